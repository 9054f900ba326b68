// Copyright (c) 2024 Botho Foundation

//! Deterministic contract execution for CONTRACT blocks.
//!
//! A contract is a list of typed [`Operation`]s interpreted natively against a
//! private copy of the account state. The only inputs are the state copy, the
//! read-only transaction parameters and the block timestamp; randomness and
//! wall-clock reads are rejected.
//!
//! The interpreter runs on its own thread. The caller waits with a deadline
//! and, once it elapses, raises the cancel flag and returns
//! [`ContractError::Timeout`] without waiting for the worker. The worker also
//! checks the deadline and the flag before every step, so it exits promptly.

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::AccountState;

/// Contract code as stored in a CONTRACT block's `code` field.
pub type ContractProgram = Vec<Operation>;

/// Default wall-clock budget for one contract execution.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Contract execution exceeded {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    #[error("Contract execution failed: {0}")]
    Execution(String),

    #[error("Non-deterministic source denied: {0}")]
    NonDeterministic(&'static str),

    #[error("Missing transaction parameter: {0}")]
    MissingParam(String),
}

/// A value read by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    /// A literal amount.
    Lit(i64),
    /// An integer transaction parameter.
    Param(String),
    /// Current ledger entry for an account (0 when absent).
    Ledger(String),
    /// The block timestamp in milliseconds.
    Now,
    /// Always rejected.
    Random,
    /// Always rejected.
    WallClock,
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Lit(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    /// `ledger[from] -= amount; ledger[to] += amount`
    Transfer {
        from: String,
        to: String,
        amount: Operand,
    },
    Credit {
        account: String,
        amount: Operand,
    },
    Debit {
        account: String,
        amount: Operand,
    },
    /// Fails unless `ledger[account] >= at_least`.
    Require {
        account: String,
        #[serde(rename = "atLeast")]
        at_least: Operand,
    },
    NotBefore {
        at: Operand,
    },
    NotAfter {
        at: Operand,
    },
    Fail {
        reason: String,
    },
    /// Runs `body` `times` times, or until the deadline when `times` is absent.
    Repeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        times: Option<u64>,
        body: Vec<Operation>,
    },
}

impl Operation {
    /// Ledger transfer whose amount comes from the `amount` transaction parameter.
    pub fn ledger_transfer(from: impl Into<String>, to: impl Into<String>) -> Self {
        Operation::Transfer {
            from: from.into(),
            to: to.into(),
            amount: Operand::Param("amount".to_string()),
        }
    }
}

/// Executes contract programs with a wall-clock limit.
#[derive(Debug, Clone)]
pub struct ContractRunner {
    timeout: Duration,
}

impl Default for ContractRunner {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl ContractRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `code` against a copy of `state` and return the resulting state.
    ///
    /// `state` is never modified. `timestamp` is the block's own timestamp and
    /// is the only notion of time visible to the program.
    pub fn execute(
        &self,
        code: &[Operation],
        state: &AccountState,
        params: &BTreeMap<String, Value>,
        timestamp: u64,
    ) -> Result<AccountState, ContractError> {
        let limit_ms = self.timeout.as_millis() as u64;
        let deadline = Instant::now() + self.timeout;
        let cancel = Arc::new(AtomicBool::new(false));

        let mut interpreter = Interpreter {
            state: state.clone(),
            params: params.clone(),
            timestamp,
            deadline,
            cancel: cancel.clone(),
            limit_ms,
        };
        let code = code.to_vec();

        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("contract".to_string())
            .spawn(move || {
                let result = interpreter.run(&code).map(|()| interpreter.state);
                // The receiver is gone when the caller already timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| ContractError::Execution(format!("failed to spawn worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::SeqCst);
                warn!(limit_ms, "contract execution timed out");
                Err(ContractError::Timeout { limit_ms })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ContractError::Execution(
                "contract worker terminated unexpectedly".to_string(),
            )),
        }
    }
}

struct Interpreter {
    state: AccountState,
    params: BTreeMap<String, Value>,
    timestamp: u64,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    limit_ms: u64,
}

impl Interpreter {
    fn run(&mut self, code: &[Operation]) -> Result<(), ContractError> {
        for op in code {
            self.exec(op)?;
        }
        Ok(())
    }

    fn check_budget(&self) -> Result<(), ContractError> {
        if self.cancel.load(Ordering::Relaxed) || Instant::now() >= self.deadline {
            return Err(ContractError::Timeout {
                limit_ms: self.limit_ms,
            });
        }
        Ok(())
    }

    fn exec(&mut self, op: &Operation) -> Result<(), ContractError> {
        self.check_budget()?;
        match op {
            Operation::Transfer { from, to, amount } => {
                let amount = self.eval(amount)?;
                self.adjust(from, amount.checked_neg())?;
                self.adjust(to, Some(amount))?;
            }
            Operation::Credit { account, amount } => {
                let amount = self.eval(amount)?;
                self.adjust(account, Some(amount))?;
            }
            Operation::Debit { account, amount } => {
                let amount = self.eval(amount)?;
                self.adjust(account, amount.checked_neg())?;
            }
            Operation::Require { account, at_least } => {
                let needed = self.eval(at_least)?;
                let have = self.state.ledger_balance(account);
                if have < needed {
                    return Err(ContractError::Execution(format!(
                        "{account} holds {have}, requires {needed}"
                    )));
                }
            }
            Operation::NotBefore { at } => {
                let at = self.eval(at)?;
                if (self.timestamp as i64) < at {
                    return Err(ContractError::Execution(format!("not valid before {at}")));
                }
            }
            Operation::NotAfter { at } => {
                let at = self.eval(at)?;
                if (self.timestamp as i64) > at {
                    return Err(ContractError::Execution(format!("not valid after {at}")));
                }
            }
            Operation::Fail { reason } => {
                return Err(ContractError::Execution(reason.clone()));
            }
            Operation::Repeat { times, body } => match times {
                Some(n) => {
                    for _ in 0..*n {
                        self.check_budget()?;
                        self.run(body)?;
                    }
                }
                None => loop {
                    self.check_budget()?;
                    self.run(body)?;
                },
            },
        }
        Ok(())
    }

    fn eval(&self, operand: &Operand) -> Result<i64, ContractError> {
        match operand {
            Operand::Lit(n) => Ok(*n),
            Operand::Param(name) => {
                let value = self
                    .params
                    .get(name)
                    .ok_or_else(|| ContractError::MissingParam(name.clone()))?;
                value.as_i64().ok_or_else(|| {
                    ContractError::Execution(format!("parameter {name} is not an integer"))
                })
            }
            Operand::Ledger(account) => Ok(self.state.ledger_balance(account)),
            Operand::Now => Ok(self.timestamp as i64),
            Operand::Random => Err(ContractError::NonDeterministic("random")),
            Operand::WallClock => Err(ContractError::NonDeterministic("wall clock")),
        }
    }

    fn adjust(&mut self, account: &str, delta: Option<i64>) -> Result<(), ContractError> {
        let overflow = || ContractError::Execution("arithmetic overflow".to_string());
        let delta = delta.ok_or_else(overflow)?;
        let entry = self
            .state
            .ledger
            .get_or_insert_with(BTreeMap::new)
            .entry(account.to_string())
            .or_insert(0);
        *entry = entry.checked_add(delta).ok_or_else(overflow)?;
        debug!(account, delta, "contract ledger adjustment");
        Ok(())
    }
}
