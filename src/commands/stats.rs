use anyhow::Result;
use remora::db::CommandStore;
use remora::paths;

pub fn execute(json: bool) -> Result<()> {
    let store = CommandStore::open(paths::history_db_path())?;
    let stats = store.stats()?;

    if json {
        let out = serde_json::json!({
            "total_commands": stats.total_commands,
            "commands_today": stats.commands_today,
            "avg_duration_ms": stats.avg_duration_ms,
            "embedded_commands": stats.embedded_commands,
            "pending_embeddings": stats.pending_embeddings,
            "failed_embeddings": stats.failed_embeddings,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Total commands:     {}", stats.total_commands);
    println!("Commands today:     {}", stats.commands_today);
    println!("Avg duration:       {:.1} ms", stats.avg_duration_ms);
    println!("Embedded:           {}", stats.embedded_commands);
    println!("Pending embeddings: {}", stats.pending_embeddings);
    println!("Failed embeddings:  {}", stats.failed_embeddings);
    Ok(())
}
