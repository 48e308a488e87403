//! `cadence decode`: show what the engine reads out of a model reply.

use cadence_runtime::decode;
use std::io::Read;
use std::path::Path;

pub fn run(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    match decode(&text) {
        Some(mapping) => {
            println!("{}", serde_json::to_string_pretty(&mapping)?);
            Ok(())
        }
        None => Err("No tagged content found in input".into()),
    }
}
