//! Turn execution and rendering for the chat verbs.
//!
//! The interactive loop itself lives in the command handler (stdin is
//! blocking); this module owns what happens inside one turn: ship the
//! message, stream the reply to stdout as chunks decrypt, and translate
//! the turn's ending into user-facing behavior.

use std::io::Write;

use crate::client::stub::{TunnelClient, TurnEnd};
use crate::error::AppError;

/// What a finished turn means for the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered,
    ServerReportedError,
}

/// Run one complete turn: send, stream, render.
pub async fn run_turn(client: &TunnelClient, text: &str) -> Result<TurnOutcome, AppError> {
    client.send_turn(text).await?;

    print!("llm> ");
    flush_stdout();

    let end = client
        .stream_response(|piece| {
            print!("{}", piece);
            flush_stdout();
        })
        .await;
    println!();

    match end {
        Ok(TurnEnd::Complete) => Ok(TurnOutcome::Answered),
        Ok(TurnEnd::ServerError) => {
            println!("[!] the server reported an error for this turn");
            Ok(TurnOutcome::ServerReportedError)
        }
        Err(err) => Err(err),
    }
}

/// Exit-code mapping for `-m` one-shot mode.
pub fn one_shot_result(outcome: TurnOutcome) -> crate::error::Result<()> {
    match outcome {
        TurnOutcome::Answered => Ok(()),
        TurnOutcome::ServerReportedError => {
            Err(AppError::transport("server reported an error for the turn"))
        }
    }
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
