use anyhow::Result;
use remora::{App, Config};

pub fn execute(query: &str) -> Result<()> {
    let app = App::init(Config::load()?)?;
    let results = app.semantic_search(query)?;

    if results.is_empty() {
        println!("No semantically similar commands for '{query}'");
    }
    for scored in &results {
        println!(
            "{:.3}  {}  {}",
            scored.similarity,
            scored.record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            scored.record.command
        );
    }

    app.shutdown();
    Ok(())
}
