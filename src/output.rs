//! CLI output formatting for the publish pipeline.
//!
//! # Output Format
//!
//! Every stage opens with a numbered header; what the stage did follows as
//! indented detail lines:
//!
//! ```text
//! ==> Stage 1: build /home/me/blog (draft)
//!     Output: /home/me/blog/public
//! ==> Stage 2: derive webp siblings
//!     3 lossless, 12 lossy
//! ==> Stage 3: patch 2 rule(s)
//!     index.xml: 4 replaced
//!     404.html: not needed
//! ==> Stage 4: mask noindex + robots.txt
//!     31 HTML files, 31 rewritten
//! ==> Stage 5: mirror deploy@web1:/srv/draft
//!     12 transferred, 1 deleted
//! ==> Stage 6: refresh skipped (draft build)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::config::{CONFIG_FILENAME, PublishConfig};
use crate::mirror::MirrorStats;
use crate::pipeline::{PublishError, PublishEvent, PublishReport, Stage};
use crate::types::BuildMode;
use std::path::Path;

fn stage_header(stage: Stage, rest: &str) -> String {
    format!("==> Stage {}: {} {}", stage.number(), stage.name(), rest)
}

fn mirror_line(stats: &MirrorStats) -> String {
    if stats.is_noop() {
        "    up to date".to_string()
    } else {
        format!(
            "    {} transferred, {} deleted",
            stats.transferred, stats.deleted
        )
    }
}

// ============================================================================
// Pipeline progress
// ============================================================================

/// Format a single pipeline event as display lines.
pub fn format_publish_event(event: &PublishEvent) -> Vec<String> {
    match event {
        PublishEvent::StageStarted { stage, detail } => vec![stage_header(*stage, detail)],
        PublishEvent::StageSkipped { stage, reason } => {
            vec![stage_header(*stage, &format!("skipped ({reason})"))]
        }
        PublishEvent::Built { output } => vec![format!("    Output: {}", output.display())],
        PublishEvent::Derived(report) => {
            if report.total() == 0 {
                vec!["    no images".to_string()]
            } else {
                vec![format!(
                    "    {} lossless, {} lossy",
                    report.lossless, report.lossy
                )]
            }
        }
        PublishEvent::Patched(outcomes) => outcomes
            .iter()
            .map(|o| match o.replaced {
                0 => format!("    {}: not needed", o.file),
                n => format!("    {}: {} replaced", o.file, n),
            })
            .collect(),
        PublishEvent::Masked(report) => vec![format!(
            "    {} HTML files, {} rewritten",
            report.html_files, report.files_rewritten
        )],
        PublishEvent::Mirrored { stats, .. } => vec![mirror_line(stats)],
        PublishEvent::Refreshed { .. } => vec!["    precompressed artifacts regenerated".to_string()],
    }
}

pub fn print_publish_event(event: &PublishEvent) {
    for line in format_publish_event(event) {
        println!("{}", line);
    }
}

// ============================================================================
// Summary
// ============================================================================

/// One-line summary after a successful run.
pub fn format_report(report: &PublishReport) -> Vec<String> {
    let target = match report.mirror {
        Some(_) => report.destination.to_string(),
        None => format!("{} (not synced)", report.output.display()),
    };
    vec![format!("==> Published {} build → {}", report.mode, target)]
}

pub fn print_report(report: &PublishReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}

/// What the operator sees when a run fails.
pub fn format_error(error: &PublishError) -> Vec<String> {
    let mut lines = vec![format!("error: {error}")];
    if let PublishError::Scope(_) = error {
        lines.push(
            "    if the generator config was left modified, run `sitepub restore-config`"
                .to_string(),
        );
    }
    lines
}

pub fn print_error(error: &PublishError) {
    for line in format_error(error) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

/// Resolved settings shown by `sitepub check`.
pub fn format_check(config: &PublishConfig, config_path: &Path, root: &Path) -> Vec<String> {
    let source = if config_path.exists() {
        config_path.display().to_string()
    } else {
        format!("{} (not found, stock defaults)", CONFIG_FILENAME)
    };
    let paths = config.site.paths(root);
    let mut lines = vec![
        format!("Config: {}", source),
        format!("    Generator: {}", config.site.generator),
        format!("    Site config: {}", paths.config.display()),
        format!("    Output: {}", paths.output.display()),
        "Destinations".to_string(),
    ];
    for mode in [BuildMode::Production, BuildMode::Draft] {
        lines.push(format!("    {}: {}", mode, config.destination(mode)));
    }
    lines.push(format!("    draft base URL: {}", config.draft.base_url));
    lines.push(format!("{} patch rule(s)", config.patches.len()));
    lines
}

pub fn print_check(config: &PublishConfig, config_path: &Path, root: &Path) {
    for line in format_check(config, config_path, root) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::DeriveReport;
    use crate::mask::MaskReport;
    use crate::patch::PatchOutcome;
    use crate::scope::ScopeError;
    use crate::types::Destination;
    use std::path::PathBuf;

    fn report(mirror: Option<MirrorStats>) -> PublishReport {
        PublishReport {
            mode: BuildMode::Production,
            output: PathBuf::from("/blog/public"),
            destination: Destination::new("web1", "/srv/www"),
            derive: DeriveReport::default(),
            patches: Vec::new(),
            mask: None,
            mirror,
            refreshed: false,
        }
    }

    #[test]
    fn stage_started_header() {
        let lines = format_publish_event(&PublishEvent::StageStarted {
            stage: Stage::Mirror,
            detail: "web1:/srv/www".into(),
        });
        assert_eq!(lines, vec!["==> Stage 5: mirror web1:/srv/www"]);
    }

    #[test]
    fn stage_skipped_header() {
        let lines = format_publish_event(&PublishEvent::StageSkipped {
            stage: Stage::Refresh,
            reason: "draft build",
        });
        assert_eq!(lines, vec!["==> Stage 6: refresh skipped (draft build)"]);
    }

    #[test]
    fn derived_counts() {
        let lines = format_publish_event(&PublishEvent::Derived(DeriveReport {
            lossless: 3,
            lossy: 12,
        }));
        assert_eq!(lines, vec!["    3 lossless, 12 lossy"]);
    }

    #[test]
    fn derived_without_images() {
        let lines = format_publish_event(&PublishEvent::Derived(DeriveReport::default()));
        assert_eq!(lines, vec!["    no images"]);
    }

    #[test]
    fn patched_lists_each_rule() {
        let lines = format_publish_event(&PublishEvent::Patched(vec![
            PatchOutcome {
                file: "index.xml".into(),
                replaced: 4,
            },
            PatchOutcome {
                file: "404.html".into(),
                replaced: 0,
            },
        ]));
        assert_eq!(
            lines,
            vec!["    index.xml: 4 replaced", "    404.html: not needed"]
        );
    }

    #[test]
    fn masked_counts() {
        let lines = format_publish_event(&PublishEvent::Masked(MaskReport {
            html_files: 31,
            files_rewritten: 30,
            replacements: 30,
        }));
        assert_eq!(lines, vec!["    31 HTML files, 30 rewritten"]);
    }

    #[test]
    fn mirrored_up_to_date() {
        let lines = format_publish_event(&PublishEvent::Mirrored {
            destination: Destination::local("/srv/www"),
            stats: MirrorStats::default(),
        });
        assert_eq!(lines, vec!["    up to date"]);
    }

    #[test]
    fn report_synced() {
        let lines = format_report(&report(Some(MirrorStats::default())));
        assert_eq!(lines, vec!["==> Published production build → web1:/srv/www"]);
    }

    #[test]
    fn report_not_synced() {
        let lines = format_report(&report(None));
        assert_eq!(
            lines,
            vec!["==> Published production build → /blog/public (not synced)"]
        );
    }

    #[test]
    fn error_names_stage() {
        let err = PublishError::Refresh(crate::refresh::RefreshError::Clear(
            crate::mirror::TransportError::MissingSource(PathBuf::from("/x")),
        ));
        let lines = format_error(&err);
        assert!(lines[0].starts_with("error: refresh failed: "));
    }

    #[test]
    fn scope_error_suggests_restore() {
        let err = PublishError::Scope(ScopeError::Busy {
            path: PathBuf::from("config.toml"),
            backup: PathBuf::from("config.toml.sitepub-backup"),
        });
        let lines = format_error(&err);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("restore-config"));
    }

    #[test]
    fn check_lists_destinations() {
        let config = PublishConfig::default();
        let lines = format_check(
            &config,
            Path::new("/nonexistent/publish.toml"),
            Path::new("/blog"),
        );
        assert!(lines[0].contains("stock defaults"));
        assert!(lines.contains(&"    production: /var/www/html".to_string()));
        assert!(lines.contains(&"    draft: /var/www/draft".to_string()));
        assert!(lines.contains(&"    Output: /blog/public".to_string()));
    }
}
