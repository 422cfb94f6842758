//! System prompt and observation formatting for the ReAct loop.

use toolwright_core::ToolResult;

const FORMAT_INSTRUCTIONS: &str = "\
Work step by step. On every turn, reply in exactly one of two ways.

To call a tool:
<thought>why this tool helps</thought>
<action>tool_name</action>
<action_input>{\"parameter\": \"value\"}</action_input>

To answer the user:
<final_answer>your answer</final_answer>

Call at most one tool per turn and wait for its observation. Action input
must be a JSON object using the parameter names listed for the tool. When
the observations are enough to answer, give the final answer.";

const EXAMPLES: &str = "\
Example 1
User: How many open invoices does ACME have?
Assistant:
<thought>I need the invoice count for ACME.</thought>
<action>count_invoices</action>
<action_input>{\"client\": \"ACME\", \"status\": \"open\"}</action_input>
Observation: {\"count\": 3}
Assistant:
<final_answer>ACME has 3 open invoices.</final_answer>

Example 2
User: Thanks, that's all.
Assistant:
<final_answer>You're welcome!</final_answer>";

/// Build the system prompt around a tool catalogue.
pub fn system_prompt(catalogue: &str) -> String {
    let tools = if catalogue.trim().is_empty() {
        "(no tools are available; answer directly)"
    } else {
        catalogue.trim_end()
    };
    format!(
        "You are an assistant that can use tools to answer requests.\n\n\
         Available tools:\n{tools}\n\n{FORMAT_INSTRUCTIONS}\n\n{EXAMPLES}"
    )
}

/// The message fed back to the model after a tool ran.
pub fn observation(result: &ToolResult) -> String {
    format!("Observation: {}", result.observation_text())
}
