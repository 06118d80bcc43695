//! Command-line surface

use clap::{value_parser, Arg, ArgAction, Command};
use relay_core::{ContributionStatus, Direction, LedgerState, TaskId};
use std::path::PathBuf;

fn task_arg() -> Arg {
    Arg::new("task")
        .required(true)
        .value_parser(value_parser!(TaskId))
        .help("Task id")
}

fn worker_arg() -> Arg {
    Arg::new("worker")
        .long("worker")
        .required(true)
        .help("Name of the contributing worker")
}

fn findings_arg() -> Arg {
    Arg::new("findings")
        .long("findings")
        .default_value("")
        .help("What the worker found or produced")
}

fn notes_arg() -> Arg {
    Arg::new("notes")
        .long("notes")
        .default_value("")
        .help("Notes for whoever picks up next")
}

pub(crate) fn build() -> Command {
    Command::new("relay")
        .version(relay_core::VERSION)
        .about("Durable task ledger for handoffs between independent workers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: ./relay.toml if present)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Ledger directory, overrides store.data_dir"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("init")
                .about("Create a task ledger if it does not exist")
                .arg(task_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Print a task ledger")
                .arg(task_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the stored document as JSON"),
                ),
        )
        .subcommand(Command::new("list").about("List known tasks"))
        .subcommand(
            Command::new("criterion")
                .about("Define a completion criterion")
                .arg(task_arg())
                .arg(Arg::new("key").long("key").required(true).help("Unique criterion key"))
                .arg(
                    Arg::new("description")
                        .long("description")
                        .default_value("")
                        .help("Human-readable description"),
                )
                .arg(
                    Arg::new("check")
                        .long("check")
                        .required(true)
                        .help("Shell command that verifies the criterion"),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_parser(value_parser!(f64))
                        .allow_negative_numbers(true)
                        .help("Make this a threshold criterion"),
                )
                .arg(
                    Arg::new("direction")
                        .long("direction")
                        .requires("threshold")
                        .value_parser(value_parser!(Direction))
                        .help("Comparison against the threshold: >=, <= or =="),
                ),
        )
        .subcommand(
            Command::new("item")
                .about("Declare a work item")
                .arg(task_arg())
                .arg(Arg::new("item").required(true).help("Work item id"))
                .arg(
                    Arg::new("description")
                        .long("description")
                        .default_value("")
                        .help("What the item covers"),
                )
                .arg(
                    Arg::new("depends-on")
                        .long("depends-on")
                        .action(ArgAction::Append)
                        .help("Item that must complete first (repeatable)"),
                ),
        )
        .subcommand(
            Command::new("contribute")
                .about("Append a contribution")
                .arg(task_arg())
                .arg(worker_arg())
                .arg(
                    Arg::new("status")
                        .long("status")
                        .required(true)
                        .value_parser(value_parser!(ContributionStatus))
                        .help("complete, blocked or needs-input"),
                )
                .arg(
                    Arg::new("item")
                        .long("item")
                        .help("Work item this contribution satisfies"),
                )
                .arg(findings_arg())
                .arg(notes_arg()),
        )
        .subcommand(
            Command::new("block")
                .about("Declare the task blocked and move it to blocked")
                .arg(task_arg())
                .arg(worker_arg())
                .arg(findings_arg())
                .arg(notes_arg()),
        )
        .subcommand(
            Command::new("transition")
                .about("Move the task to another state")
                .arg(task_arg())
                .arg(
                    Arg::new("state")
                        .required(true)
                        .value_parser(value_parser!(LedgerState))
                        .help("active, blocked or complete"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Run the checks of every criterion not yet met")
                .arg(task_arg())
                .arg(
                    Arg::new("timeout-secs")
                        .long("timeout-secs")
                        .value_parser(value_parser!(u64).range(1..))
                        .help("Per-check timeout, overrides verifier.check_timeout_secs"),
                )
                .arg(
                    Arg::new("workdir")
                        .long("workdir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory the checks run in"),
                ),
        )
        .subcommand(
            Command::new("next")
                .about("List work items that can start now")
                .arg(task_arg()),
        )
        .subcommand(
            Command::new("plan")
                .about("Group remaining work items into parallel waves")
                .arg(task_arg()),
        )
        .subcommand(
            Command::new("next-steps")
                .about("Replace the task's next steps")
                .arg(task_arg())
                .arg(
                    Arg::new("steps")
                        .num_args(0..)
                        .action(ArgAction::Append)
                        .help("Steps, in order"),
                ),
        )
        .subcommand(
            Command::new("question")
                .about("Manage open questions")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .arg(task_arg())
                        .arg(Arg::new("text").required(true)),
                )
                .subcommand(
                    Command::new("resolve")
                        .arg(task_arg())
                        .arg(Arg::new("text").required(true)),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<clap::ArgMatches, clap::Error> {
        build().try_get_matches_from(std::iter::once("relay").chain(args.iter().copied()))
    }

    #[test]
    fn command_is_well_formed() {
        build().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let m = parse(&["show", "T1", "--data-dir", "/tmp/ledgers", "--json-logs"]).unwrap();
        assert_eq!(
            m.get_one::<PathBuf>("data-dir"),
            Some(&PathBuf::from("/tmp/ledgers"))
        );
        assert!(m.get_flag("json-logs"));
    }

    #[test]
    fn threshold_criterion() {
        let m = parse(&[
            "criterion", "T1", "--key", "files", "--check", "grep -c old src/*",
            "--threshold", "0", "--direction", "<=",
        ])
        .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert_eq!(sub.get_one::<f64>("threshold"), Some(&0.0));
        assert_eq!(sub.get_one::<Direction>("direction"), Some(&Direction::AtMost));
    }

    #[test]
    fn direction_needs_threshold() {
        let err = parse(&["criterion", "T1", "--key", "k", "--check", "true", "--direction", ">="])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn contribution_status_is_validated() {
        let m = parse(&["contribute", "T1", "--worker", "w", "--status", "needs-input"]).unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert_eq!(
            sub.get_one::<ContributionStatus>("status"),
            Some(&ContributionStatus::NeedsInput)
        );

        let err = parse(&["contribute", "T1", "--worker", "w", "--status", "done"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn repeated_dependencies() {
        let m = parse(&["item", "T1", "deploy", "--depends-on", "build", "--depends-on", "test"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        let deps: Vec<&String> = sub.get_many::<String>("depends-on").unwrap().collect();
        assert_eq!(deps, ["build", "test"]);
    }

    #[test]
    fn empty_task_id_is_rejected() {
        let err = parse(&["init", ""]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(parse(&["verify", "T1", "--timeout-secs", "0"]).is_err());
    }
}
