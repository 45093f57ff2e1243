use crate::commands::common::{pretty_value, resolve_value, Scheduler};
use crate::error::CliError;

pub async fn run_set(scheduler: &Scheduler, key: &str, parts: &[String]) -> Result<(), CliError> {
    let value = resolve_value(parts)?;
    scheduler.set(key, &value).await?;
    println!("Stored {key} ({} bytes)", value.len());
    Ok(())
}

pub async fn run_get(scheduler: &Scheduler, key: &str, pretty: bool) -> Result<(), CliError> {
    let value = scheduler
        .get(key)
        .await?
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;
    if pretty {
        println!("{}", pretty_value(&value));
    } else {
        println!("{value}");
    }
    Ok(())
}

pub async fn run_remove(scheduler: &Scheduler, key: &str) -> Result<(), CliError> {
    if scheduler.get(key).await?.is_none() {
        return Err(CliError::NotFound(key.to_string()));
    }
    scheduler.remove(key).await?;
    println!("Removed {key}");
    Ok(())
}
