use anyhow::Result;
use remora::{App, Config};

pub fn execute() -> Result<()> {
    let app = App::init(Config::load()?)?;
    let queued = app.retry_failed()?;
    println!("Re-queued {queued} failed commands for embedding");
    app.shutdown();
    Ok(())
}
