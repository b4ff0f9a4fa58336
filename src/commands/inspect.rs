use crate::{AppContext, Outcome, progress, ui};
use anyhow::Result;
use colored::Colorize;
use reconcile::{InstanceState, PackageManagerKind};
use std::collections::BTreeMap;

pub fn run(app: &AppContext, instance: &str) -> Result<Outcome> {
    let engine = app.engine()?;
    let spinner = progress::spinner_unless(!app.chatty(), &format!("Inspecting {instance}..."));
    let state = engine.inspect(&app.remote_context(), instance);
    spinner.finish_and_clear();
    let state = state?;

    if app.json {
        super::print_json(&state)?;
    } else {
        print_state(app, instance, &state);
    }
    Ok(Outcome::Success)
}

fn print_state(app: &AppContext, instance: &str, state: &InstanceState) {
    ui::header(instance);
    ui::kv("package manager", state.package_manager.as_str());
    let available: Vec<_> = state.available_managers.iter().map(|m| m.as_str()).collect();
    ui::kv("available", &available.join(", "));
    ui::kv(
        "inspected",
        &state.last_inspected.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    ui::section("Packages");
    let mut by_manager: BTreeMap<PackageManagerKind, Vec<&str>> = BTreeMap::new();
    for package in &state.packages {
        by_manager
            .entry(package.manager)
            .or_default()
            .push(package.name.as_str());
    }
    for (manager, names) in &by_manager {
        ui::kv(manager.as_str(), &format!("{} installed", names.len()));
        if app.verbose > 0 {
            ui::dim(&names.join(" "));
        }
    }

    ui::section("Services");
    for service in &state.services {
        if !service.is_running() && !service.enabled && app.verbose == 0 {
            continue;
        }
        let status = if service.is_running() {
            service.status.to_string().green()
        } else {
            service.status.to_string().dimmed()
        };
        let boot = if service.enabled { "enabled" } else { "disabled" };
        println!("  {:<24} {status} ({boot})", service.name);
    }

    ui::section("Users");
    for user in &state.users {
        if !user.is_regular() && app.verbose == 0 {
            continue;
        }
        println!(
            "  {:<16} uid {:<6} {} [{}]",
            user.name,
            user.uid,
            user.home.dimmed(),
            user.groups.join(", ")
        );
    }

    ui::section("Listening ports");
    for port in &state.ports {
        match state.port_owners.get(port) {
            Some(owner) => println!("  {port:<6} {}", owner.dimmed()),
            None => println!("  {port}"),
        }
    }

    if !state.applied_templates.is_empty() {
        ui::section("Applied templates");
        for applied in &state.applied_templates {
            let version = applied.version.as_deref().unwrap_or("-");
            println!(
                "  {} {} {}",
                applied.name.bold(),
                version,
                applied.applied_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
            );
        }
    }
}
