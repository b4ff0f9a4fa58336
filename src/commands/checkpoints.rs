use crate::cli::CheckpointsCommand;
use crate::{AppContext, Outcome, progress, ui};
use anyhow::Result;
use colored::Colorize;

pub fn run(app: &AppContext, cmd: CheckpointsCommand) -> Result<Outcome> {
    match cmd {
        CheckpointsCommand::List { instance } => list(app, &instance),
        CheckpointsCommand::Create {
            instance,
            description,
        } => create(app, &instance, &description),
        CheckpointsCommand::Prune {
            instance,
            keep,
            yes,
        } => prune(app, &instance, keep, yes),
    }
}

fn list(app: &AppContext, instance: &str) -> Result<Outcome> {
    let engine = app.engine()?;
    let checkpoints = engine.list_checkpoints(instance)?;

    if app.json {
        super::print_json(&checkpoints)?;
        return Ok(Outcome::Success);
    }

    if checkpoints.is_empty() {
        ui::info(&format!("No checkpoints for {instance}"));
        return Ok(Outcome::Success);
    }

    ui::header(&format!("Checkpoints for {instance}"));
    for checkpoint in &checkpoints {
        println!(
            "  {} {}",
            checkpoint.id.bold(),
            checkpoint
                .created_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed()
        );
        ui::dim(&format!(
            "{} · {} packages, {} services, {} users, {} files",
            checkpoint.description,
            checkpoint.package_count,
            checkpoint.service_count,
            checkpoint.user_count,
            checkpoint.file_count
        ));
    }
    Ok(Outcome::Success)
}

fn create(app: &AppContext, instance: &str, description: &str) -> Result<Outcome> {
    let engine = app.engine()?;
    let _lock = app.lock(instance)?;

    let spinner =
        progress::spinner_unless(!app.chatty(), &format!("Snapshotting {instance}..."));
    let id = engine
        .rollback_manager()
        .create_checkpoint(&app.remote_context(), instance, description);
    spinner.finish_and_clear();
    let id = id?;

    if app.json {
        super::print_json(&serde_json::json!({ "checkpoint_id": id }))?;
    } else {
        ui::success(&format!("Created checkpoint {id}"));
    }
    Ok(Outcome::Success)
}

fn prune(app: &AppContext, instance: &str, keep: usize, yes: bool) -> Result<Outcome> {
    let engine = app.engine()?;
    let total = engine.list_checkpoints(instance)?.len();
    if total <= keep {
        if app.json {
            super::print_json(&Vec::<String>::new())?;
        } else {
            ui::info(&format!("{instance} has {total} checkpoints, nothing to prune"));
        }
        return Ok(Outcome::Success);
    }

    let prompt = format!(
        "Delete {} of {instance}'s checkpoints, keeping the newest {keep}?",
        total - keep
    );
    if !super::confirm(app, yes, &prompt)? {
        ui::info("Cancelled");
        return Ok(Outcome::Success);
    }

    let deleted = engine.prune_checkpoints(instance, keep)?;
    if app.json {
        super::print_json(&deleted)?;
    } else {
        ui::success(&format!("Deleted {} checkpoints", deleted.len()));
        for id in &deleted {
            ui::dim(id);
        }
    }
    Ok(Outcome::Success)
}
