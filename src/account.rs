// src/account.rs
//
// Account registry entry: the exchange connection an executor dispatches
// through, its rate limit, websocket connection flags, and the cached
// balance snapshot refreshed by the reactor's balance loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{AccountId, Balance};

/// Which streams an account keeps open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountModes {
    pub ws_private: bool,
    pub ws_public: bool,
    pub fetch_private_balance: bool,
}

/// Static description of an exchange account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Adapter driver name, e.g. "binance" or "mock".
    pub driver: String,
    /// Published request budget for the executor, requests per second.
    pub rate_limit_rps: u32,
    pub modes: AccountModes,
}

/// Connection flag for one websocket stream, shared with the adapter
/// task that owns the socket.
#[derive(Debug, Clone, Default)]
pub struct WsStatus {
    connected: Arc<AtomicBool>,
}

impl WsStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Mutable account-owned state, one lock per account.
#[derive(Debug, Default)]
pub struct AccountState {
    pub balances: HashMap<String, Balance>,
    pub ws_private: Option<WsStatus>,
    pub ws_public: Option<WsStatus>,
}

impl AccountState {
    pub fn balance(&self, currency: &str) -> Option<&Balance> {
        self.balances.get(currency)
    }

    pub fn apply_balances(&mut self, balances: Vec<Balance>) {
        for balance in balances {
            self.balances.insert(balance.currency.clone(), balance);
        }
    }

    /// True when every websocket this account was asked to keep open is
    /// actually connected. Accounts with no sockets are trivially ready.
    pub fn ws_ready(&self, modes: &AccountModes) -> bool {
        if modes.ws_private
            && !self
                .ws_private
                .as_ref()
                .is_some_and(|ws| ws.is_connected())
        {
            return false;
        }
        if modes.ws_public
            && !self
                .ws_public
                .as_ref()
                .is_some_and(|ws| ws.is_connected())
        {
            return false;
        }
        true
    }
}

pub type SharedAccountState = Arc<Mutex<AccountState>>;

pub fn shared_account_state() -> SharedAccountState {
    Arc::new(Mutex::new(AccountState::default()))
}
