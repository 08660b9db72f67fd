//! One-shot registration of running processes from /proc

use anyhow::Result;
use cgclass_core::{ClassificationContext, Process};
use serde::Serialize;
use tracing::debug;

/// Outcome of a snapshot run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotReport {
    pub scanned: usize,
    pub registered: usize,
    pub classified: usize,
    pub skipped: usize,
}

/// Register every process visible in /proc
///
/// Processes whose executable cannot be read (kernel threads, other users'
/// processes without privileges) are skipped.
pub fn register_running(ctx: &mut ClassificationContext) -> Result<SnapshotReport> {
    let mut report = SnapshotReport::default();

    for entry in procfs::process::all_processes()? {
        report.scanned += 1;

        let proc = match entry {
            Ok(proc) => proc,
            Err(e) => {
                debug!("Skipping unreadable /proc entry: {}", e);
                report.skipped += 1;
                continue;
            }
        };

        let Ok(pid) = u32::try_from(proc.pid) else {
            report.skipped += 1;
            continue;
        };

        let binary = match proc.exe() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                debug!("Skipping process {}: {}", pid, e);
                report.skipped += 1;
                continue;
            }
        };

        let mut record = Process::new(pid, binary);
        if let Some(argv0) = proc.cmdline().ok().and_then(|args| args.into_iter().next()) {
            record = record.with_argv0(argv0);
        }

        register(ctx, record, &mut report)?;
    }

    Ok(report)
}

/// Insert one process and classify it when a rule names its executable
pub fn register(
    ctx: &mut ClassificationContext,
    process: Process,
    report: &mut SnapshotReport,
) -> Result<()> {
    let pid = process.pid;
    let target = ctx
        .lookup_rule(&process.binary)?
        .and_then(|rule| rule.group.clone());

    ctx.insert_process(process)?;
    report.registered += 1;

    if let Some(group) = target {
        if ctx.lookup_group(&group)?.is_some() {
            ctx.assign_process(pid, &group)?;
            report.classified += 1;
        } else {
            debug!("Rule for process {} names unknown group {}", pid, group);
        }
    }

    Ok(())
}
