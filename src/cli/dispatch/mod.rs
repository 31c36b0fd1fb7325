//! Map validated CLI arguments to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, oauth, ARG_DSN, ARG_FRONTEND_BASE_URL, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(3030);

    let non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    Ok(Action::Server(Args {
        port,
        dsn: non_empty(ARG_DSN),
        frontend_base_url: non_empty(ARG_FRONTEND_BASE_URL),
        auth: auth::Options::parse(matches)?,
        providers: oauth::parse(matches)?,
    }))
}
