//! Prompt templates used by the conductors, kept as data so the
//! orchestration logic contains no literal prose. Placeholders use
//! `{name}` and are substituted with [`render`].

pub const HIERARCHICAL_MANAGER: &str = "\
You are coordinating a team of worker agents.

Available workers:
{workers}

Use the delegate_task tool to assign subtasks to workers by id. When the \
workers have provided what you need, synthesize a final answer yourself.

Request:
{input}";

pub const DELEGATE_TOOL_DESCRIPTION: &str = "\
Delegate a task to a worker agent and receive its response. Available workers:
{workers}";

pub const DEBATE_POSITION: &str = "\
Debate topic: {topic}

State your position on the topic. Be concrete and give your strongest \
supporting arguments.";

pub const DEBATE_REBUTTAL: &str = "\
Debate topic: {topic}

The other participants' latest statements:
{others}

Your previous statement:
{own}

Respond to the other participants. You may defend your position, refine \
it, or move toward common ground where you find their arguments convincing.";

pub const DEBATE_JUDGE: &str = "\
You are judging a debate on: {topic}

{summaries}

Weigh the positions and deliver a final verdict with your reasoning.";

pub const DEBATE_VOTE: &str = "\
The debate on \"{topic}\" has concluded. The final positions:
{positions}

Vote for the strongest position other than your own by naming that \
participant's id.";

pub const VOTE_PROPOSE: &str = "\
{topic}

Propose one concise option to address this. Reply with the option text \
only, on a single line.";

pub const VOTE_BALLOT: &str = "\
{topic}

Options:
{options}

Reply with the number of the option you choose.";

pub const VOTE_RANKED_BALLOT: &str = "\
{topic}

Options:
{options}

Reply with a comma-separated ranking of the option numbers, most \
preferred first.";

/// Substitute `{name}` placeholders in a template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}
