//! `toolwright cache-key`: Compute the result-cache key for a tool call.

use toolwright_agent::parser::decode_parameters;
use toolwright_tools::ResultCache;

pub fn run(tool: &str, params: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", key(tool, params)?);
    Ok(())
}

pub(crate) fn key(tool: &str, params: &str) -> Result<String, String> {
    let params = decode_parameters(params)
        .ok_or_else(|| format!("Parameters are not a JSON object: {params}"))?;
    Ok(ResultCache::key_for(tool, &params))
}
