//! Interactive terminal session: the stand-in for the conversion form.
//! Keystrokes go into the engine as raw edits; the displayed state and the
//! loading / expiry signals are rendered whenever they change.

use anyhow::Result;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::CurrenciesConfig;
use crate::engine::{FormSnapshot, SyncHandle};
use crate::quote::FieldKey;

/// Form-level validity verdict reported with each edit: a value is invalid
/// when present but not a positive number.
fn is_invalid(value: &str) -> bool {
    !value.is_empty() && !value.parse::<f64>().is_ok_and(|v| v > 0.0)
}

pub async fn run_session(handle: SyncHandle, currencies: &CurrenciesConfig) -> Result<()> {
    println!("{}", style("Interactive rate converter").bold());
    println!("Commands: s <amount> (sent), r <amount> (received), q to quit");

    let mut form = handle.form();
    let mut loading = handle.loading();
    let mut expired_soon = handle.expired_soon();
    let mut rate_expired = handle.rate_expired();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "q" || input == "quit" {
                    break;
                }
                match input.split_once(' ') {
                    Some(("s", amount)) => {
                        let amount = amount.trim();
                        handle.edit(FieldKey::Sent, amount, is_invalid(amount)).await;
                    }
                    Some(("r", amount)) => {
                        let amount = amount.trim();
                        handle.edit(FieldKey::Received, amount, is_invalid(amount)).await;
                    }
                    _ => println!("Unrecognized command: {input}"),
                }
            }
            changed = form.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&form.borrow().clone(), *loading.borrow(), *expired_soon.borrow(), *rate_expired.borrow(), currencies);
            }
            changed = loading.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&form.borrow().clone(), *loading.borrow(), *expired_soon.borrow(), *rate_expired.borrow(), currencies);
            }
            changed = expired_soon.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&form.borrow().clone(), *loading.borrow(), *expired_soon.borrow(), *rate_expired.borrow(), currencies);
            }
            changed = rate_expired.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&form.borrow().clone(), *loading.borrow(), *expired_soon.borrow(), *rate_expired.borrow(), currencies);
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn render(
    form: &FormSnapshot,
    loading: bool,
    expired_soon: bool,
    rate_expired: bool,
    currencies: &CurrenciesConfig,
) {
    let rate = if form.rate.is_empty() {
        "-".to_string()
    } else {
        form.rate.clone()
    };

    let mut flags = Vec::new();
    if loading {
        flags.push("fetching");
    }
    if rate_expired {
        flags.push("refreshing");
    }
    if expired_soon {
        flags.push("expires soon");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    println!(
        "{} {} -> {} {} @ {}{}",
        style(&form.sent_amount).bold(),
        currencies.sent,
        style(&form.received_amount).bold(),
        currencies.received,
        style(&rate).cyan(),
        style(&flags).dim(),
    );
}
