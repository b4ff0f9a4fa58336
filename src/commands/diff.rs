use crate::cli::DiffArgs;
use crate::{AppContext, Outcome, progress, template_file, ui};
use anyhow::{Result, bail};
use colored::Colorize;
use reconcile::{PackageDiff, TemplateDiff};

pub fn run(app: &AppContext, args: DiffArgs) -> Result<Outcome> {
    let mut template = template_file::load(&args.template)?;
    if let Some(kind) = args.package_manager {
        if !kind.is_known() {
            bail!("--package-manager must name a concrete manager");
        }
        template = template.retarget(kind);
    }

    let engine = app.engine()?;
    let spinner = progress::spinner_unless(
        !app.chatty(),
        &format!("Inspecting {}...", args.instance),
    );
    let diff = engine.diff_template(&app.remote_context(), &args.instance, &template);
    spinner.finish_and_clear();
    let diff = diff?;

    if app.json {
        super::print_json(&diff)?;
    } else {
        print_plan(&args.instance, &template.name, &diff);
    }

    Ok(if diff.has_conflicts() {
        Outcome::Conflict
    } else {
        Outcome::Success
    })
}

/// Human rendering of a diff.
pub fn print_plan(instance: &str, template: &str, diff: &TemplateDiff) {
    ui::header(&format!("{template} → {instance}"));

    if !diff.has_changes() && !diff.has_conflicts() {
        ui::success("Instance already matches the template");
        return;
    }

    let packages: Vec<&PackageDiff> = diff
        .packages_to_install
        .iter()
        .chain(&diff.packages_to_upgrade)
        .chain(&diff.packages_to_remove)
        .collect();
    if !packages.is_empty() {
        ui::section("Packages");
        for package in packages {
            print_package(package);
        }
    }

    if !diff.services_to_configure.is_empty() {
        ui::section("Services");
        for service in &diff.services_to_configure {
            let verbs: Vec<_> = service.actions.iter().map(|a| a.verb()).collect();
            let current = service
                .current_status
                .map_or_else(|| "not installed".to_string(), |s| s.to_string());
            ui::change(
                '~',
                &format!("{}: {} ({})", service.name, verbs.join(", "), current.dimmed()),
            );
        }
    }

    if !diff.users_to_create.is_empty() || !diff.users_to_modify.is_empty() {
        ui::section("Users");
        for user in &diff.users_to_create {
            ui::change('+', &format!("{} [{}]", user.name, user.groups.join(", ")));
        }
        for user in &diff.users_to_modify {
            ui::change('~', &format!("{} +[{}]", user.name, user.groups.join(", ")));
        }
    }

    if !diff.ports_to_open.is_empty() {
        ui::section("Ports");
        for port in &diff.ports_to_open {
            ui::change('+', &port.to_string());
        }
    }

    if diff.has_conflicts() {
        ui::section("Conflicts");
        for conflict in &diff.conflicts_found {
            ui::change('!', &conflict.description);
        }
    }

    println!();
    ui::dim(&diff.summary());
}

fn print_package(package: &PackageDiff) {
    let name = format!("{} ({})", package.name, package.manager);
    match package.action {
        reconcile::PackageAction::Install => {
            let version = package.target_version.as_deref().unwrap_or("latest");
            ui::change('+', &format!("{name} {}", version.dimmed()));
        }
        reconcile::PackageAction::Upgrade => {
            let from = package.current_version.as_deref().unwrap_or("?");
            let to = package.target_version.as_deref().unwrap_or("latest");
            ui::change('~', &format!("{name} {from} → {to}"));
        }
        reconcile::PackageAction::Remove => ui::change('-', &name),
    }
}
