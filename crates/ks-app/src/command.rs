//! Inbound commands.
//!
//! Network handlers authenticate and parse a request into a batch of
//! [`Command`]s and hand it to a [`CommandIngress`]. The main loop drains
//! the matching [`CommandQueue`] once per tick, so outputs keep a single
//! writer. A batch is accepted or refused as a whole.

use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};

use ks_auth::{Authenticator, KeyValue, SignedRequest, parse_json, parse_query};
use ks_controls::OutputMode;
use ks_core::OutputId;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetEnabled(bool),
    SetSetpoint(f64),
    SetOutputMode { output: OutputId, mode: OutputMode },
}

impl Command {
    /// Parse one pair: `enabled=true|false`, `target=<°C>` or
    /// `relay<n>=on|off|auto|pid` with `n` counted from 1.
    pub fn from_pair(kv: &KeyValue) -> AppResult<Self> {
        let invalid = |reason: &str| AppError::InvalidCommand {
            key: kv.key.clone(),
            value: kv.value.clone(),
            reason: reason.to_string(),
        };
        let key = kv.key.trim().to_ascii_lowercase();
        let value = kv.value.trim();

        if key == "enabled" {
            return match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(Self::SetEnabled(true)),
                "false" | "0" | "off" => Ok(Self::SetEnabled(false)),
                _ => Err(invalid("expected true or false")),
            };
        }
        if key == "target" {
            let celsius: f64 = value.parse().map_err(|_| invalid("not a number"))?;
            if !celsius.is_finite() {
                return Err(invalid("not a finite number"));
            }
            return Ok(Self::SetSetpoint(celsius));
        }
        if let Some(number) = key.strip_prefix("relay") {
            let output = number
                .parse::<u8>()
                .ok()
                .and_then(OutputId::from_number)
                .ok_or_else(|| invalid("relay number must be 1 or more"))?;
            let mode = value
                .parse::<OutputMode>()
                .map_err(|_| invalid("expected on, off, auto or pid"))?;
            return Ok(Self::SetOutputMode { output, mode });
        }
        Err(invalid("unknown key"))
    }

    /// Check the command against the board it will be applied to.
    pub fn check(&self, limits: &CommandLimits) -> AppResult<()> {
        match *self {
            Self::SetEnabled(_) => Ok(()),
            Self::SetSetpoint(celsius) if celsius <= 0.0 || celsius >= limits.temp_absmax_c => {
                Err(AppError::InvalidCommand {
                    key: "target".into(),
                    value: celsius.to_string(),
                    reason: format!("must lie strictly between 0 and {}", limits.temp_absmax_c),
                })
            }
            Self::SetSetpoint(_) => Ok(()),
            Self::SetOutputMode { output, mode } if output.index() >= limits.outputs => {
                Err(AppError::InvalidCommand {
                    key: format!("relay{}", output.number()),
                    value: mode.to_string(),
                    reason: format!("board has {} outputs", limits.outputs),
                })
            }
            Self::SetOutputMode { .. } => Ok(()),
        }
    }

    /// Parse and check every pair of an already verified request. One bad
    /// pair refuses the whole batch.
    pub fn parse_batch(request: &SignedRequest, limits: &CommandLimits) -> AppResult<Vec<Self>> {
        request
            .pairs
            .iter()
            .map(|kv| {
                let command = Self::from_pair(kv)?;
                command.check(limits)?;
                Ok(command)
            })
            .collect()
    }
}

/// Bounds a command must respect on the running board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLimits {
    /// Setpoints must lie strictly between 0 and this.
    pub temp_absmax_c: f64,
    /// Number of relay outputs.
    pub outputs: usize,
}

/// Create a queue holding at most `capacity` pending batches.
pub fn command_queue(
    capacity: usize,
    auth: Authenticator,
    limits: CommandLimits,
) -> (CommandIngress, CommandQueue) {
    let (tx, rx) = sync_channel(capacity);
    (
        CommandIngress {
            auth,
            limits,
            tx,
            capacity,
        },
        CommandQueue { rx },
    )
}

/// Producer side, owned by the network handlers.
#[derive(Debug, Clone)]
pub struct CommandIngress {
    auth: Authenticator,
    limits: CommandLimits,
    tx: SyncSender<Vec<Command>>,
    capacity: usize,
}

impl CommandIngress {
    /// Verify, parse, check and enqueue one request, all or nothing.
    pub fn submit(&self, request: &SignedRequest) -> AppResult<usize> {
        if let Err(e) = self.auth.verify_request(request) {
            warn!(error = %e, "command batch rejected");
            return Err(e.into());
        }
        let batch = Command::parse_batch(request, &self.limits).inspect_err(|e| {
            warn!(error = %e, "command batch rejected");
        })?;
        let count = batch.len();
        self.tx.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!(capacity = self.capacity, "command queue full");
                AppError::QueueFull {
                    capacity: self.capacity,
                }
            }
            TrySendError::Disconnected(_) => AppError::QueueClosed,
        })?;
        debug!(count, "command batch queued");
        Ok(count)
    }

    /// `a=1&b=2&hmac=..` form.
    pub fn submit_query(&self, query: &str) -> AppResult<usize> {
        self.submit(&parse_query(query))
    }

    /// `{"a":1,"b":2,"hmac":".."}` form.
    pub fn submit_json(&self, json: &str) -> AppResult<usize> {
        self.submit(&parse_json(json)?)
    }
}

/// Consumer side, drained by the main loop.
#[derive(Debug)]
pub struct CommandQueue {
    rx: Receiver<Vec<Command>>,
}

impl CommandQueue {
    /// Every batch pending right now, oldest first. Never blocks.
    pub fn drain(&self) -> Vec<Vec<Command>> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: CommandLimits = CommandLimits {
        temp_absmax_c: 125.0,
        outputs: 3,
    };

    fn kv(k: &str, v: &str) -> KeyValue {
        KeyValue::new(k, v)
    }

    #[test]
    fn parses_each_command_word() {
        assert_eq!(
            Command::from_pair(&kv("enabled", "true")).unwrap(),
            Command::SetEnabled(true)
        );
        assert_eq!(
            Command::from_pair(&kv("target", "80.5")).unwrap(),
            Command::SetSetpoint(80.5)
        );
        assert_eq!(
            Command::from_pair(&kv("relay3", "pid")).unwrap(),
            Command::SetOutputMode {
                output: OutputId::from_number(3).unwrap(),
                mode: OutputMode::Auto,
            }
        );
    }

    #[test]
    fn rejects_bad_pairs() {
        for (k, v) in [
            ("enabled", "maybe"),
            ("target", "warm"),
            ("target", "inf"),
            ("relay0", "on"),
            ("relayx", "on"),
            ("relay1", "sideways"),
            ("volume", "11"),
        ] {
            assert!(
                matches!(Command::from_pair(&kv(k, v)), Err(AppError::InvalidCommand { .. })),
                "{k}={v}"
            );
        }
    }

    #[test]
    fn board_limits_checked() {
        assert!(Command::SetSetpoint(80.0).check(&LIMITS).is_ok());
        for bad in [0.0, -5.0, 125.0, 130.0] {
            assert!(
                matches!(
                    Command::SetSetpoint(bad).check(&LIMITS),
                    Err(AppError::InvalidCommand { .. })
                ),
                "{bad}"
            );
        }
        let relay = |n| Command::SetOutputMode {
            output: OutputId::from_number(n).unwrap(),
            mode: OutputMode::ForcedOn,
        };
        assert!(relay(3).check(&LIMITS).is_ok());
        assert!(relay(4).check(&LIMITS).is_err());
    }

    #[test]
    fn queue_is_bounded_and_drains_in_order() {
        let auth = Authenticator::new("k").unwrap();
        let (ingress, queue) = command_queue(2, auth.clone(), LIMITS);
        for target in ["70", "71"] {
            let qs = auth.sign_query(&[kv("target", target)]).unwrap();
            ingress.submit_query(&qs).unwrap();
        }
        let qs = auth.sign_query(&[kv("target", "72")]).unwrap();
        assert!(matches!(
            ingress.submit_query(&qs),
            Err(AppError::QueueFull { capacity: 2 })
        ));

        let batches = queue.drain();
        assert_eq!(
            batches,
            vec![
                vec![Command::SetSetpoint(70.0)],
                vec![Command::SetSetpoint(71.0)]
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn unsigned_or_invalid_batches_never_queue() {
        let auth = Authenticator::new("k").unwrap();
        let (ingress, queue) = command_queue(4, auth.clone(), LIMITS);
        assert!(matches!(
            ingress.submit_query("enabled=true"),
            Err(AppError::Auth(_))
        ));
        let qs = auth
            .sign_query(&[kv("enabled", "true"), kv("relay1", "sideways")])
            .unwrap();
        assert!(ingress.submit_query(&qs).is_err());
        assert!(queue.drain().is_empty());
    }

    proptest::proptest! {
        #[test]
        fn one_bad_pair_refuses_the_batch(
            targets in proptest::collection::vec(1.0f64..120.0, 0..5),
            at in 0usize..5,
        ) {
            let auth = Authenticator::new("k").unwrap();
            let (ingress, queue) = command_queue(4, auth.clone(), LIMITS);
            let mut pairs: Vec<KeyValue> =
                targets.iter().map(|t| kv("target", &t.to_string())).collect();
            pairs.insert(at.min(pairs.len()), kv("relay1", "sideways"));
            let qs = auth.sign_query(&pairs).unwrap();
            proptest::prop_assert!(ingress.submit_query(&qs).is_err());
            proptest::prop_assert!(queue.drain().is_empty());
        }
    }
}
