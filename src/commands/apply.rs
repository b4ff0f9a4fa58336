use crate::cli::ApplyArgs;
use crate::commands::diff::print_plan;
use crate::{AppContext, Outcome, progress, template_file, ui};
use anyhow::{Context, Result};
use colored::Colorize;
use rayon::prelude::*;
use reconcile::{ApplyRequest, ApplyResponse, CategoryStatus, EngineError, Template, TemplateEngine};
use serde_json::json;

/// Result for one instance.
struct InstanceRun {
    instance: String,
    result: Result<ApplyResponse>,
}

impl InstanceRun {
    fn outcome(&self) -> Outcome {
        match &self.result {
            Ok(response) if response.success => Outcome::Success,
            Ok(_) => Outcome::PartialFailure,
            Err(err) => Outcome::of_error(err),
        }
    }
}

pub fn run(app: &AppContext, args: ApplyArgs) -> Result<Outcome> {
    let template = template_file::load(&args.template)?;

    if !args.dry_run {
        let prompt = format!(
            "Apply template '{}' to {}?",
            template.name,
            args.instances.join(", ")
        );
        if !super::confirm(app, args.yes, &prompt)? {
            ui::info("Cancelled");
            return Ok(Outcome::Success);
        }
    }

    let engine = app.engine()?;
    let jobs = args.jobs.unwrap_or(app.config.defaults.jobs).max(1);
    let runs = apply_all(app, &engine, &template, &args, jobs)?;

    if app.json {
        let body: Vec<_> = runs.iter().map(run_json).collect();
        super::print_json(&body)?;
    } else {
        for run in &runs {
            print_run(app, run);
        }
    }

    Ok(runs
        .iter()
        .map(InstanceRun::outcome)
        .max()
        .unwrap_or(Outcome::Success))
}

fn apply_all(
    app: &AppContext,
    engine: &TemplateEngine,
    template: &Template,
    args: &ApplyArgs,
    jobs: usize,
) -> Result<Vec<InstanceRun>> {
    let label = if args.dry_run { "Planning" } else { "Applying" };
    let pb = if app.chatty() {
        progress::bar(args.instances.len() as u64, label)
    } else {
        indicatif::ProgressBar::hidden()
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("Failed to create apply thread pool")?;

    let runs = pool.install(|| {
        args.instances
            .par_iter()
            .map(|instance| {
                pb.set_message(instance.clone());
                let result = apply_one(app, engine, template, args, instance);
                let symbol = match &result {
                    Ok(response) if response.success => "✓",
                    _ => "✗",
                };
                pb.set_message(format!("{symbol} {instance}"));
                pb.inc(1);
                InstanceRun {
                    instance: instance.clone(),
                    result,
                }
            })
            .collect::<Vec<_>>()
    });

    pb.finish_and_clear();
    Ok(runs)
}

fn apply_one(
    app: &AppContext,
    engine: &TemplateEngine,
    template: &Template,
    args: &ApplyArgs,
    instance: &str,
) -> Result<ApplyResponse> {
    let _lock = if args.dry_run {
        None
    } else {
        Some(app.lock(instance)?)
    };

    let mut request = ApplyRequest::new(instance, template.clone());
    if args.dry_run {
        request = request.dry_run();
    }
    if args.force {
        request = request.force();
    }
    if let Some(kind) = args.package_manager {
        request = request.with_package_manager(kind);
    }

    log::info!("Applying {} to {instance}", template.name);
    Ok(engine.apply_template(&app.remote_context(), request)?)
}

fn run_json(run: &InstanceRun) -> serde_json::Value {
    match &run.result {
        Ok(response) => json!({
            "instance": run.instance,
            "exit_code": run.outcome().exit_code(),
            "response": response,
        }),
        Err(err) => {
            let engine_err = err.downcast_ref::<EngineError>();
            json!({
                "instance": run.instance,
                "exit_code": run.outcome().exit_code(),
                "error": {
                    "message": format!("{err:#}"),
                    "category": engine_err.map(|e| e.category().description()),
                    "checkpoint_id": engine_err.and_then(EngineError::checkpoint_id),
                },
            })
        }
    }
}

fn print_run(app: &AppContext, run: &InstanceRun) {
    let response = match &run.result {
        Ok(response) => response,
        Err(err) => {
            ui::error(&format!("{}:", run.instance.bold()));
            crate::report_error(err);
            return;
        }
    };

    if response.dry_run {
        if let Some(diff) = &response.diff {
            print_plan(&run.instance, &response.template_name, diff);
        }
        for warning in &response.warnings {
            ui::warn(warning);
        }
        return;
    }

    if response.success {
        ui::success(&format!("{}: {}", run.instance.bold(), response.message));
    } else {
        ui::error(&format!("{}: {}", run.instance.bold(), response.message));
    }

    if !app.quiet {
        ui::kv(
            "packages",
            &format!(
                "{} installed, {} upgraded, {} removed",
                response.packages_installed, response.packages_upgraded, response.packages_removed
            ),
        );
        ui::kv("services", &response.services_configured.to_string());
        ui::kv(
            "users",
            &format!(
                "{} created, {} modified",
                response.users_created, response.users_modified
            ),
        );
        if !response.intended_ports.is_empty() {
            let ports: Vec<_> = response.intended_ports.iter().map(u16::to_string).collect();
            ui::kv("ports to open", &ports.join(", "));
        }
        ui::kv("took", &ui::format_duration(response.execution_time));
    }

    if let Some(failure) = &response.failure {
        ui::section("Categories");
        for report in &response.categories {
            let status = match report.status {
                CategoryStatus::Applied => "applied".green(),
                CategoryStatus::Failed => "failed".red(),
                CategoryStatus::NotAttempted => "not attempted".dimmed(),
            };
            println!("  {:<10} {} ({} changes)", report.category.to_string(), status, report.changes);
        }
        ui::dim(&failure.to_string());
    }

    for warning in &response.warnings {
        ui::warn(warning);
    }

    if let Some(id) = &response.rollback_checkpoint {
        if response.success {
            ui::dim(&format!("checkpoint {id}"));
        } else {
            ui::info(&format!("Restore with: tessera rollback {} {id}", run.instance));
        }
    }
}
