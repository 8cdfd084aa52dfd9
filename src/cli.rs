//! Command-line front end over a file-backed [`Repository`].

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use palimpsest::Repository;
use palimpsest::config::EngineConfig;
use palimpsest::events::TracingSink;
use palimpsest::merge::{MergeResult, MergeStrategy};
use palimpsest::model::branch::{Branch, BranchStatus};
use palimpsest::model::section::{SectionId, SectionKind};
use palimpsest::model::types::{BranchName, ContentPath, Principal, Role, VersionId};
use palimpsest::model::version::Version;
use palimpsest::store::FileStore;

/// Content versioning and collaborative editing engine
///
/// Every document (content path) has an append-only history of versions
/// and named branches pointing into it. Edits are committed on branches,
/// branches are merged section by section, and one version per document
/// can be published.
///
/// QUICK START:
///
///   palimpsest init guides/intro --file intro.md
///   palimpsest branch create guides/intro rewrite
///   palimpsest commit guides/intro --branch rewrite --file intro.md
///   palimpsest merge guides/intro rewrite
///   palimpsest publish guides/intro v3
#[derive(Parser)]
#[command(name = "palimpsest")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'palimpsest <command> --help' for more information on a specific command.")]
pub struct Cli {
    /// Repository directory
    #[arg(long, global = true, env = "PALIMPSEST_REPO", default_value = ".palimpsest")]
    repo: PathBuf,

    /// Principal id recorded as author or reviewer
    #[arg(long, global = true, env = "PALIMPSEST_AUTHOR", default_value = "local")]
    author: String,

    /// Display name (defaults to the author id)
    #[arg(long = "name", global = true)]
    display_name: Option<String>,

    /// Role of the principal: viewer, editor, reviewer or admin
    #[arg(long, global = true, default_value = "editor")]
    role: Role,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create a document with its first version and default branch
    Init {
        /// Content path, e.g. guides/intro
        path: ContentPath,
        /// File with the initial content ('-' for stdin)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Commit new content on a branch
    Commit {
        /// Content path
        path: ContentPath,
        /// File with the full new content ('-' for stdin)
        #[arg(short, long)]
        file: PathBuf,
        /// Branch to commit on (default branch if omitted)
        #[arg(short, long)]
        branch: Option<BranchName>,
    },

    /// List the versions of a document
    Log {
        /// Content path
        path: ContentPath,
        /// Show only the newest N versions
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Print the content of one version
    Show {
        /// Content path
        path: ContentPath,
        /// Version, e.g. v3 or 3
        #[arg(value_name = "VERSION")]
        id: VersionId,
    },

    /// Section-level diff between two versions
    Diff {
        /// Content path
        path: ContentPath,
        /// Old version
        from: VersionId,
        /// New version
        to: VersionId,
    },

    /// Manage branches
    #[command(subcommand)]
    Branch(BranchCommand),

    /// Merge a branch into another branch
    ///
    /// Without --resolve, a merge with conflicts prints them and changes
    /// nothing. Rerun with one --resolve per conflict to merge manually.
    Merge {
        /// Content path
        path: ContentPath,
        /// Branch to merge
        source: BranchName,
        /// Receiving branch (default branch if omitted)
        #[arg(long)]
        into: Option<BranchName>,
        /// Resolution for a conflicted section range, read from FILE (one
        /// trailing newline is dropped), e.g. --resolve 1..2=fixed.txt
        #[arg(long = "resolve", value_name = "SECTION=FILE")]
        resolve: Vec<String>,
    },

    /// Publish a version, archiving the previously published one
    Publish {
        /// Content path
        path: ContentPath,
        /// Version to publish
        #[arg(value_name = "VERSION")]
        id: VersionId,
    },

    /// Review workflow
    #[command(subcommand)]
    Review(ReviewCommand),

    /// Commit an earlier version's content as a new version
    Rollback {
        /// Content path
        path: ContentPath,
        /// Version whose content to restore
        #[arg(value_name = "VERSION")]
        id: VersionId,
        /// Branch to commit on (default branch if omitted)
        #[arg(short, long)]
        branch: Option<BranchName>,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum BranchCommand {
    /// Fork a branch
    Create {
        /// Content path
        path: ContentPath,
        /// New branch name
        name: BranchName,
        /// Base version (default branch head if omitted)
        #[arg(long)]
        from: Option<VersionId>,
    },
    /// List branches
    List {
        /// Content path
        path: ContentPath,
    },
    /// Abandon a branch
    Abandon {
        /// Content path
        path: ContentPath,
        /// Branch name
        name: BranchName,
    },
}

#[derive(Subcommand)]
enum ReviewCommand {
    /// Submit a draft for review
    Submit {
        /// Content path
        path: ContentPath,
        /// Version
        #[arg(value_name = "VERSION")]
        id: VersionId,
    },
    /// Approve a version under review (requires --role reviewer or admin)
    Approve {
        /// Content path
        path: ContentPath,
        /// Version
        #[arg(value_name = "VERSION")]
        id: VersionId,
    },
    /// Send a version under review back to draft
    Reject {
        /// Content path
        path: ContentPath,
        /// Version
        #[arg(value_name = "VERSION")]
        id: VersionId,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one parsed command line.
#[allow(clippy::too_many_lines)]
pub fn run(cli: Cli) -> Result<()> {
    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "palimpsest", &mut io::stdout());
        return Ok(());
    }

    let repo = open(&cli.repo)?;
    let me = Principal::new(
        cli.author.clone(),
        cli.display_name.clone().unwrap_or_else(|| cli.author.clone()),
        cli.role,
    );
    let out = Output(cli.format);

    match cli.command {
        Command::Init { path, file } => {
            let content = read_input(&file)?;
            let (version, branch) = repo.init_document(&path, &content, &me)?;
            out.version(&version, &format!("initialised {path} at {} on '{}'", version.id, branch.name))
        }
        Command::Commit { path, file, branch } => {
            let content = read_input(&file)?;
            let branch = find_branch(&repo, &path, branch.as_ref())?;
            let version = repo.branches().commit(&branch.id, &content, &me)?;
            out.version(&version, &format!("committed {} on '{}': {}", version.id, branch.name, version.summary))
        }
        Command::Log { path, limit } => {
            let mut history = repo.versions().get_history(&path)?;
            history.reverse();
            history.truncate(limit.unwrap_or(usize::MAX));
            out.list(&history, |v| {
                let merge = v.merge_parent.map(|m| format!("  (merge of {m})")).unwrap_or_default();
                format!(
                    "{:<5} {:<15} {:<24} {}{merge}",
                    v.id.to_string(),
                    v.status.to_string(),
                    v.author.to_string(),
                    v.summary
                )
            })
        }
        Command::Show { path, id } => {
            let v = repo.versions().get_version(&path, id)?;
            out.version(&v, &v.content)
        }
        Command::Diff { path, from, to } => {
            let diff = repo.diff(&path, from, to)?;
            if out.is_json() {
                return out.json(&serde_json::json!({
                    "granularity": diff.granularity,
                    "summary": diff.summary,
                    "sections": diff.sections,
                }));
            }
            let g = diff.granularity;
            for s in &diff.sections {
                println!("@@ {} {} ({}% similar)", s.section, s.kind, s.similarity_pct);
                if s.kind != SectionKind::Addition {
                    for line in s.old_text(g).lines() {
                        println!("-{line}");
                    }
                }
                if s.kind != SectionKind::Deletion {
                    for line in s.new_text(g).lines() {
                        println!("+{line}");
                    }
                }
            }
            println!("{}", diff.summary);
            Ok(())
        }
        Command::Branch(cmd) => run_branch(&repo, &me, out, cmd),
        Command::Merge {
            path,
            source,
            into,
            resolve,
        } => {
            let source = find_branch(&repo, &path, Some(&source))?;
            let target = find_branch(&repo, &path, into.as_ref())?;
            let strategy = if resolve.is_empty() {
                MergeStrategy::Auto
            } else {
                MergeStrategy::Manual {
                    resolutions: parse_resolutions(&resolve)?,
                }
            };
            let result = repo.merges().merge(&source.id, &target.id, &strategy, &me)?;
            report_merge(out, &result)?;
            let version = result.require_merged()?;
            if !out.is_json() {
                println!("merged '{}' into '{}' at {}", source.name, target.name, version.id);
            }
            Ok(())
        }
        Command::Publish { path, id } => {
            let reviewer = me.role.can_review().then_some(&me);
            let v = repo.publication().publish(&path, id, reviewer)?;
            out.version(&v, &format!("published {} of {path}", v.id))
        }
        Command::Review(cmd) => {
            let p = repo.publication();
            let v = match cmd {
                ReviewCommand::Submit { path, id } => p.submit_for_review(&path, id, &me)?,
                ReviewCommand::Approve { path, id } => p.approve(&path, id, &me)?,
                ReviewCommand::Reject { path, id } => p.reject(&path, id, &me)?,
            };
            out.version(&v, &format!("{} is now {}", v.id, v.status))
        }
        Command::Rollback { path, id, branch } => {
            let branch = find_branch(&repo, &path, branch.as_ref())?;
            let v = repo.publication().rollback_branch(&branch.id, id, &me)?;
            out.version(&v, &format!("restored content of {id} as {} on '{}'", v.id, branch.name))
        }
        Command::Completions { .. } => Ok(()),
    }
}

fn run_branch(repo: &Repository, me: &Principal, out: Output, cmd: BranchCommand) -> Result<()> {
    match cmd {
        BranchCommand::Create { path, name, from } => {
            let base = match from {
                Some(v) => v,
                None => find_branch(repo, &path, None)?.head,
            };
            let b = repo.branches().create_branch(&path, &name, base, me)?;
            out.branch(&b, &format!("created '{}' at {}", b.name, b.base))
        }
        BranchCommand::List { path } => out.list(&repo.branches().list_branches(&path)?, |b| {
            format!("{:<20} {:<10} head {:<5} base {}", b.name.as_str(), b.status.to_string(), b.head.to_string(), b.base)
        }),
        BranchCommand::Abandon { path, name } => {
            let b = find_branch(repo, &path, Some(&name))?;
            let b = repo
                .branches()
                .close_branch(&b.id, BranchStatus::Abandoned)?;
            out.branch(&b, &format!("abandoned '{}'", b.name))
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open(root: &Path) -> Result<Repository> {
    let config = EngineConfig::load(&root.join(EngineConfig::FILE_NAME))?;
    let store = FileStore::open(root)
        .with_context(|| format!("opening repository at {}", root.display()))?;
    Ok(Repository::new(Arc::new(store), Arc::new(TracingSink), config))
}

fn find_branch(repo: &Repository, path: &ContentPath, name: Option<&BranchName>) -> Result<Branch> {
    let name = name.unwrap_or_else(|| repo.branches().default_branch_name());
    Ok(repo.branches().find_branch(path, name)?)
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut s = String::new();
        io::stdin().read_to_string(&mut s).context("reading stdin")?;
        return Ok(s);
    }
    fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn parse_resolutions(args: &[String]) -> Result<BTreeMap<SectionId, String>> {
    let mut out = BTreeMap::new();
    for arg in args {
        let Some((section, file)) = arg.split_once('=') else {
            bail!("invalid --resolve '{arg}'\n  To fix: use SECTION=FILE, e.g. --resolve 1..2=fixed.txt");
        };
        let section: SectionId = section.parse()?;
        let mut text = read_input(Path::new(file))?;
        if text.ends_with('\n') {
            text.pop();
        }
        if out.insert(section, text).is_some() {
            bail!("section {section} resolved twice");
        }
    }
    Ok(out)
}

fn report_merge(out: Output, result: &MergeResult) -> Result<()> {
    if out.is_json() {
        return out.json(&serde_json::json!({
            "success": result.success,
            "conflicts": result.conflicts,
            "merged_version": result.merged_version.as_ref().map(|v| v.id),
        }));
    }
    for c in result.conflicts.iter().filter(|c| !c.is_resolved()) {
        println!("CONFLICT {c}");
        println!("  base:   {:?}", c.base_content);
        println!("  source: {:?}", c.source_content);
        println!("  target: {:?}", c.target_content);
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Output(Format);

impl Output {
    fn is_json(self) -> bool {
        self.0 == Format::Json
    }

    fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value).context("encoding JSON output")?);
        Ok(())
    }

    fn version(self, v: &Version, text: &str) -> Result<()> {
        if self.is_json() {
            return self.json(v);
        }
        println!("{text}");
        Ok(())
    }

    fn branch(self, b: &Branch, text: &str) -> Result<()> {
        if self.is_json() {
            return self.json(b);
        }
        println!("{text}");
        Ok(())
    }

    fn list<T: Serialize>(self, items: &[T], line: impl Fn(&T) -> String) -> Result<()> {
        if self.is_json() {
            return self.json(items);
        }
        for item in items {
            println!("{}", line(item));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_merge_with_resolutions() {
        let cli = Cli::try_parse_from([
            "palimpsest",
            "--role",
            "reviewer",
            "merge",
            "guides/intro",
            "feature",
            "--resolve",
            "1..2=a.txt",
        ])
        .unwrap();
        assert_eq!(cli.role, Role::Reviewer);
        match cli.command {
            Command::Merge { source, resolve, .. } => {
                assert_eq!(source.as_str(), "feature");
                assert_eq!(resolve, vec!["1..2=a.txt".to_owned()]);
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(Cli::try_parse_from(["palimpsest", "log", "/abs"]).is_err());
        assert!(Cli::try_parse_from(["palimpsest", "show", "doc", "vx"]).is_err());
    }

    #[test]
    fn bad_resolution_syntax() {
        assert!(parse_resolutions(&["1..2".to_owned()]).is_err());
        assert!(parse_resolutions(&["x=y".to_owned()]).is_err());
    }
}
