//! `ta dedup` subcommands.

use std::path::Path;
use tracing::info;

use super::{GlobalOptions, open_manager, print_json, tree_or_default};
use crate::cli::{DedupCommands, PolicyArgs};
use crate::config::{self, CliOverrides};
use crate::dedup::{DeduplicationPolicy, MigrationOptions};
use crate::error::{AttachError, Result};
use crate::format::{
    format_integrity_report, format_migration_report, format_policy, format_scan_outcome,
    format_stats,
};
use crate::model::HashAlgorithm;

/// Execute a dedup subcommand.
///
/// # Errors
///
/// Returns an error if the project cannot be opened or the operation fails.
pub fn execute(command: &DedupCommands, global: &GlobalOptions) -> Result<()> {
    match command {
        DedupCommands::Stats { top } => stats(*top, global),
        DedupCommands::Scan { path } => scan(path.as_deref(), global),
        DedupCommands::Migrate { path, dry_run } => migrate(path.as_deref(), *dry_run, global),
        DedupCommands::Verify { deep, clean_temp } => verify(*deep, *clean_temp, global),
        DedupCommands::Policy(args) => policy(args, global),
    }
}

fn stats(top: usize, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let stats = manager.dedup().stats_with_top(top)?;
    if global.json {
        return print_json(&stats);
    }
    if !global.quiet {
        print!("{}", format_stats(&stats));
    }
    Ok(())
}

fn scan(path: Option<&Path>, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let tree = tree_or_default(&manager, path);
    let outcome = manager
        .dedup()
        .scan(&tree, !global.quiet && !global.json)?;
    if global.json {
        return print_json(&outcome);
    }
    if !global.quiet {
        print!("{}", format_scan_outcome(&outcome));
    }
    Ok(())
}

fn migrate(path: Option<&Path>, dry_run: bool, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    let tree = tree_or_default(&manager, path);
    let options = MigrationOptions {
        dry_run,
        show_progress: !global.quiet && !global.json,
        cancel: None,
    };
    let report = manager.migrate(&tree, &options)?;
    info!(
        groups = report.groups_found,
        removed = report.duplicates_removed,
        reclaimed = report.space_reclaimed,
        dry_run,
        "Migration finished"
    );
    if global.json {
        return print_json(&report);
    }
    if !global.quiet {
        print!("{}", format_migration_report(&report));
    }
    Ok(())
}

fn verify(deep: bool, clean_temp: bool, global: &GlobalOptions) -> Result<()> {
    let (_, manager) = open_manager(global, &CliOverrides::default())?;
    if clean_temp {
        let removed = manager.dedup().clean_temp_files()?;
        if !global.json && !global.quiet {
            println!("Removed {removed} stale temp files");
        }
    }
    let report = manager.dedup().verify(deep)?;
    if global.json {
        print_json(&report)?;
    } else if !global.quiet {
        print!("{}", format_integrity_report(&report));
    }

    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

fn policy(args: &PolicyArgs, global: &GlobalOptions) -> Result<()> {
    let dir = config::resolve_project_dir(global.dir.as_deref())?;
    let mut policy = config::load_dedup_policy(&dir, &CliOverrides::default())?;

    if args.has_updates() {
        apply_policy_args(&mut policy, args)?;
        config::save_dedup_policy(&dir, &policy)?;
        info!(enabled = policy.enabled, algorithm = %policy.hash_algorithm, "Saved dedup policy");
    }

    if global.json {
        return print_json(&policy);
    }
    if !global.quiet {
        print!("{}", format_policy(&policy));
    }
    Ok(())
}

fn apply_policy_args(policy: &mut DeduplicationPolicy, args: &PolicyArgs) -> Result<()> {
    if args.enable {
        policy.enabled = true;
    }
    if args.disable {
        policy.enabled = false;
    }
    if let Some(algorithm) = &args.algorithm {
        policy.hash_algorithm = algorithm.parse::<HashAlgorithm>()?;
    }
    if let Some(min) = args.min_size {
        policy.min_file_size = min;
    }
    if let Some(max) = args.max_size {
        policy.max_file_size = max;
    }
    if args.clear_excludes {
        policy.excluded_content_types.clear();
    }
    for pattern in &args.exclude {
        let pattern = pattern.trim();
        if !pattern.is_empty() && !policy.excluded_content_types.iter().any(|p| p == pattern) {
            policy.excluded_content_types.push(pattern.to_string());
        }
    }

    if policy.max_file_size > 0 && policy.min_file_size > policy.max_file_size {
        return Err(AttachError::validation(
            "max-file-size",
            format!(
                "must be at least min-file-size ({}) or 0 for unlimited",
                policy.min_file_size
            ),
        ));
    }
    Ok(())
}
