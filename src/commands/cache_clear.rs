use anyhow::Result;
use remora::db::CommandStore;
use remora::paths;

pub fn execute() -> Result<()> {
    let store = CommandStore::open(paths::history_db_path())?;
    store.save_cache_snapshot(&[])?;
    println!("Embedding cache snapshot cleared");
    Ok(())
}
