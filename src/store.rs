//! Repository over the planner state.
//!
//! [`PlannerStore`] keeps the whole state in memory and is the only writer to
//! the database. Every mutation goes through one `&mut self` method that
//! validates, applies, recalculates the affected positions, persists and then
//! notifies subscribers. Persistence failures are retried with exponential
//! backoff, then logged; the in-memory state stays authoritative.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use backoff::ExponentialBackoff;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::db::{Database, Snapshot};
use crate::models::{
    Account, AccountChange, AccountChangeType, AccountStats, ConfigEntry, Position, Setup,
    SetupError, Side,
};
use crate::trading::{EditError, PlannerConfig, PositionEdit};

/// Config key overriding the page size of the closed-position history.
pub const HISTORY_PER_PAGE_KEY: &str = "overview.history.perPage";

const EVENT_CAPACITY: usize = 64;

/// Rejected store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("setup not found: {0}")]
    SetupNotFound(String),

    #[error("position not found: {0}")]
    PositionNotFound(String),

    #[error("invalid setup: {0}")]
    InvalidSetup(#[from] SetupError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("{0} must be greater than 0")]
    NonPositive(&'static str),

    #[error("{0} must not be negative")]
    Negative(&'static str),

    #[error("withdrawal of {amount} exceeds the balance of {balance}")]
    InsufficientBalance { balance: Decimal, amount: Decimal },

    #[error("invalid import: {0}")]
    InvalidImport(#[from] serde_json::Error),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Change notification sent to subscribers after a mutation is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    AccountChanged(String),
    AccountDeleted(String),
    SetupChanged(String),
    SetupDeleted(String),
    PositionChanged(String),
    PositionDeleted(String),
    ConfigChanged(String),
    Imported,
}

/// In-memory planner state backed by SQLite.
pub struct PlannerStore {
    db: Database,
    config: PlannerConfig,
    state: Snapshot,
    events: broadcast::Sender<StoreEvent>,
}

impl PlannerStore {
    /// Load the stored state, seeding a default setup and account when
    /// none exist yet.
    pub async fn open(db: Database, config: PlannerConfig) -> anyhow::Result<Self> {
        let state = db.load_snapshot().await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut store = Self { db, config, state, events };

        if !store.state.setups.iter().any(Setup::is_active) {
            let setup = Setup::new("Standard 3-Step", 3, vec![dec!(1), dec!(1), dec!(1)]);
            info!(setup = %setup.name, "Seeding default setup");
            store.db.save_setup(&setup).await?;
            store.state.setups.push(setup);
        }

        if store.state.accounts.is_empty() {
            let mut account = Account::new("Main Account", store.config.initial_balance);
            account.maker_fee = store.config.maker_fee;
            account.taker_fee = store.config.taker_fee;
            info!(account = %account.name, balance = %account.initial_balance, "Seeding default account");
            store.db.save_account(&account).await?;
            store.state.accounts.push(account);
        }

        let ids: Vec<String> = store.state.accounts.iter().map(|a| a.id.clone()).collect();
        for id in ids {
            store.refresh_balance(&id);
        }

        debug!(
            accounts = store.state.accounts.len(),
            setups = store.state.setups.len(),
            positions = store.state.positions.len(),
            "Planner state loaded"
        );

        Ok(store)
    }

    /// Receive a [`StoreEvent`] for every applied mutation.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Queries ====================

    pub fn accounts(&self) -> &[Account] {
        &self.state.accounts
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.state.accounts.iter().find(|a| a.id == id)
    }

    /// Setups that can be picked for new positions.
    pub fn setups(&self) -> impl Iterator<Item = &Setup> {
        self.state.setups.iter().filter(|s| s.is_active())
    }

    /// Any setup by id, soft-deleted ones included.
    pub fn setup(&self, id: &str) -> Option<&Setup> {
        self.state.setups.iter().find(|s| s.id == id)
    }

    pub fn positions(&self) -> &[Position] {
        &self.state.positions
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.state.positions.iter().find(|p| p.id == id)
    }

    pub fn account_changes(&self, account_id: &str) -> impl Iterator<Item = &AccountChange> {
        let account_id = account_id.to_string();
        self.state.account_changes.iter().filter(move |c| c.account_id == account_id)
    }

    /// Realized stats for one account.
    pub fn account_stats(&self, account_id: &str) -> Result<AccountStats, StoreError> {
        let mut account = self
            .account(account_id)
            .cloned()
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))?;
        Ok(account.calculate_stats(&self.state.positions, &self.state.account_changes))
    }

    /// One page (0-based) of closed positions, most recently closed first.
    pub fn closed_positions(&self, account_id: Option<&str>, page: usize) -> Vec<&Position> {
        let per_page = self.history_per_page();
        let mut closed: Vec<&Position> = self
            .state
            .positions
            .iter()
            .filter(|p| p.is_closed())
            .filter(|p| account_id.map_or(true, |id| p.account_id == id))
            .collect();
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        closed.into_iter().skip(page * per_page).take(per_page).collect()
    }

    fn history_per_page(&self) -> usize {
        self.config_value(HISTORY_PER_PAGE_KEY)
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
            .map_or(self.config.history_per_page, |n| n as usize)
            .max(1)
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.state.configs.iter().find(|c| c.key == key).map(|c| &c.value)
    }

    pub fn configs(&self) -> &[ConfigEntry] {
        &self.state.configs
    }

    // ==================== Setups ====================

    pub async fn add_setup(
        &mut self,
        name: &str,
        step_count: usize,
        weights: Vec<Decimal>,
    ) -> Result<Setup, StoreError> {
        let setup = Setup::new(name, step_count, weights);
        setup.validate()?;

        info!(setup = %setup.name, steps = setup.step_count, "Adding setup");
        self.state.setups.push(setup.clone());
        self.persist("setup", || self.db.save_setup(&setup)).await;
        self.notify(StoreEvent::SetupChanged(setup.id.clone()));

        Ok(setup)
    }

    /// Rename or reshape a setup. Open positions whose step count still
    /// matches are re-sized against the new weights.
    pub async fn update_setup(
        &mut self,
        id: &str,
        name: &str,
        step_count: usize,
        weights: Vec<Decimal>,
    ) -> Result<Setup, StoreError> {
        let idx = self
            .state
            .setups
            .iter()
            .position(|s| s.id == id && s.is_active())
            .ok_or_else(|| StoreError::SetupNotFound(id.to_string()))?;
        self.state.setups[idx].update(name, step_count, weights)?;
        let setup = self.state.setups[idx].clone();

        self.persist("setup", || self.db.save_setup(&setup)).await;
        self.notify(StoreEvent::SetupChanged(setup.id.clone()));

        let affected: Vec<usize> = self
            .state
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.setup_id == setup.id && !p.is_closed())
            .filter(|(_, p)| p.steps.len() == setup.step_count)
            .map(|(i, _)| i)
            .collect();
        for idx in affected {
            self.recalculate_at(idx);
            self.save_position_at(idx).await;
        }

        Ok(setup)
    }

    /// Soft-delete a setup that positions still reference, otherwise remove it.
    pub async fn delete_setup(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self
            .state
            .setups
            .iter()
            .position(|s| s.id == id && s.is_active())
            .ok_or_else(|| StoreError::SetupNotFound(id.to_string()))?;

        let referenced = self.state.positions.iter().any(|p| p.setup_id == id);
        if referenced {
            self.state.setups[idx].is_deleted = true;
            let setup = self.state.setups[idx].clone();
            info!(setup = %setup.name, "Setup still referenced, marking deleted");
            self.persist("setup", || self.db.save_setup(&setup)).await;
        } else {
            let setup = self.state.setups.remove(idx);
            info!(setup = %setup.name, "Deleting setup");
            self.persist("setup", || self.db.delete_setup(id)).await;
        }

        self.notify(StoreEvent::SetupDeleted(id.to_string()));
        Ok(())
    }

    // ==================== Accounts ====================

    pub async fn add_account(&mut self, name: &str, initial_balance: Decimal) -> Result<Account, StoreError> {
        if initial_balance < Decimal::ZERO {
            return Err(StoreError::Negative("initial balance"));
        }

        let mut account = Account::new(name, initial_balance);
        account.maker_fee = self.config.maker_fee;
        account.taker_fee = self.config.taker_fee;

        info!(account = %account.name, balance = %initial_balance, "Adding account");
        self.state.accounts.push(account.clone());
        self.persist("account", || self.db.save_account(&account)).await;
        self.notify(StoreEvent::AccountChanged(account.id.clone()));

        Ok(account)
    }

    /// Change an account's fee schedule and re-size its open positions.
    pub async fn set_account_fees(
        &mut self,
        id: &str,
        maker_fee: Decimal,
        taker_fee: Decimal,
    ) -> Result<Account, StoreError> {
        if maker_fee < Decimal::ZERO || taker_fee < Decimal::ZERO {
            return Err(StoreError::Negative("fee"));
        }
        let account = self.account_mut(id)?;
        account.maker_fee = maker_fee;
        account.taker_fee = taker_fee;
        let account = account.clone();

        self.persist("account", || self.db.save_account(&account)).await;
        self.resize_open_positions(id).await;
        self.notify(StoreEvent::AccountChanged(id.to_string()));

        Ok(account)
    }

    /// Delete an account together with its positions and balance changes.
    pub async fn delete_account(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self
            .state
            .accounts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))?;

        let account = self.state.accounts.remove(idx);
        let before = self.state.positions.len();
        self.state.positions.retain(|p| p.account_id != id);
        self.state.account_changes.retain(|c| c.account_id != id);
        info!(
            account = %account.name,
            positions = before - self.state.positions.len(),
            "Deleting account"
        );

        self.persist("account", || self.db.delete_account(id)).await;
        self.notify(StoreEvent::AccountDeleted(id.to_string()));
        Ok(())
    }

    /// Record a deposit or withdrawal. Withdrawals may not take the balance
    /// below zero.
    pub async fn record_account_change(
        &mut self,
        account_id: &str,
        amount: Decimal,
        change_type: AccountChangeType,
        note: &str,
    ) -> Result<AccountChange, StoreError> {
        if amount <= Decimal::ZERO {
            return Err(StoreError::NonPositive("amount"));
        }
        let balance = self.account_mut(account_id)?.current_balance;

        let mut change = AccountChange::new(account_id, amount, change_type);
        change.note = note.to_string();
        if balance + change.signed_amount() < Decimal::ZERO {
            return Err(StoreError::InsufficientBalance { balance, amount });
        }

        info!(account = %account_id, kind = ?change_type, amount = %amount, "Recording balance change");
        self.state.account_changes.push(change.clone());
        self.persist("account change", || self.db.save_account_change(&change)).await;
        self.refresh_balance(account_id);
        self.save_account(account_id).await;
        self.resize_open_positions(account_id).await;
        self.notify(StoreEvent::AccountChanged(account_id.to_string()));

        Ok(change)
    }

    // ==================== Positions ====================

    /// Open a planning position on `setup_id`, or on the first active setup.
    pub async fn create_position(
        &mut self,
        account_id: &str,
        symbol: &str,
        side: Side,
        setup_id: Option<&str>,
    ) -> Result<Position, StoreError> {
        if self.account(account_id).is_none() {
            return Err(StoreError::AccountNotFound(account_id.to_string()));
        }
        let setup = match setup_id {
            Some(id) => self.setups().find(|s| s.id == id),
            None => self.setups().next(),
        }
        .cloned()
        .ok_or_else(|| StoreError::SetupNotFound(setup_id.unwrap_or("<none>").to_string()))?;

        let symbol = if symbol.trim().is_empty() { self.config.default_symbol.as_str() } else { symbol };
        let mut position = Position::new(account_id, symbol.trim().to_uppercase(), side);
        position.risk_amount = self.config.default_risk;
        position.leverage = self.config.default_leverage;
        position.apply_setup(&setup);

        info!(
            position = %position.id,
            symbol = %position.symbol,
            side = position.side.as_str(),
            setup = %setup.name,
            "Creating position"
        );
        self.state.positions.push(position);
        let idx = self.state.positions.len() - 1;
        self.recalculate_at(idx);
        self.save_position_at(idx).await;
        self.notify(StoreEvent::PositionChanged(self.state.positions[idx].id.clone()));

        Ok(self.state.positions[idx].clone())
    }

    /// Apply one edit, then re-size and persist the position.
    pub async fn edit_position(&mut self, id: &str, edit: PositionEdit) -> Result<Position, StoreError> {
        let idx = self.position_index(id)?;
        let recalculate = edit.needs_recalculation();
        let settles = matches!(edit, PositionEdit::ClosePosition | PositionEdit::SetPnl(_));

        debug!(position = %id, edit = ?edit, "Editing position");
        edit.apply(&mut self.state.positions[idx], Utc::now())?;

        if recalculate {
            self.recalculate_at(idx);
        }
        self.save_position_at(idx).await;

        let position = self.state.positions[idx].clone();
        if settles && position.is_closed() {
            self.refresh_balance(&position.account_id);
            self.save_account(&position.account_id).await;
            self.resize_open_positions(&position.account_id).await;
        }

        self.notify(StoreEvent::PositionChanged(position.id.clone()));
        Ok(position)
    }

    /// Reshape a position to another setup. Steps are replaced when the
    /// step count differs.
    pub async fn apply_setup(&mut self, position_id: &str, setup_id: &str) -> Result<Position, StoreError> {
        let idx = self.position_index(position_id)?;
        if self.state.positions[idx].is_closed() {
            return Err(EditError::PositionClosed.into());
        }
        let setup = self
            .setups()
            .find(|s| s.id == setup_id)
            .cloned()
            .ok_or_else(|| StoreError::SetupNotFound(setup_id.to_string()))?;

        info!(position = %position_id, setup = %setup.name, "Applying setup");
        self.state.positions[idx].apply_setup(&setup);
        self.recalculate_at(idx);
        self.save_position_at(idx).await;
        self.notify(StoreEvent::PositionChanged(position_id.to_string()));

        Ok(self.state.positions[idx].clone())
    }

    pub async fn delete_position(&mut self, id: &str) -> Result<(), StoreError> {
        let idx = self.position_index(id)?;
        let position = self.state.positions.remove(idx);
        info!(position = %id, symbol = %position.symbol, "Deleting position");

        self.persist("position", || self.db.delete_position(id)).await;
        if position.is_closed() {
            self.refresh_balance(&position.account_id);
            self.save_account(&position.account_id).await;
        }
        self.notify(StoreEvent::PositionDeleted(id.to_string()));
        Ok(())
    }

    // ==================== Configs ====================

    pub async fn set_config(&mut self, key: &str, value: Value) {
        let entry = ConfigEntry::new(key, value);
        match self.state.configs.iter_mut().find(|c| c.key == key) {
            Some(existing) => existing.value = entry.value.clone(),
            None => self.state.configs.push(entry.clone()),
        }

        self.persist("config", || self.db.save_config(&entry)).await;
        self.notify(StoreEvent::ConfigChanged(key.to_string()));
    }

    // ==================== Import / Export ====================

    /// Pretty-printed JSON of the whole state.
    pub fn export_json(&self) -> Result<String, StoreError> {
        let json = serde_json::to_string_pretty(&self.state).context("Failed to serialize planner state")?;
        Ok(json)
    }

    /// Replace the whole state. Positions are taken as stored, without
    /// re-sizing.
    pub async fn import_json(&mut self, json: &str) -> Result<(), StoreError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        self.db.replace_all(&snapshot).await?;

        info!(
            accounts = snapshot.accounts.len(),
            setups = snapshot.setups.len(),
            positions = snapshot.positions.len(),
            "Imported planner state"
        );
        self.state = snapshot;
        self.notify(StoreEvent::Imported);
        Ok(())
    }

    // ==================== Internals ====================

    fn account_mut(&mut self, id: &str) -> Result<&mut Account, StoreError> {
        self.state
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::AccountNotFound(id.to_string()))
    }

    fn position_index(&self, id: &str) -> Result<usize, StoreError> {
        self.state
            .positions
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| StoreError::PositionNotFound(id.to_string()))
    }

    /// Re-size a position against its setup and its account's balance and fees.
    fn recalculate_at(&mut self, idx: usize) {
        let position = &self.state.positions[idx];
        let Some(setup) = self.setup(&position.setup_id).cloned() else {
            warn!(position = %position.id, setup = %position.setup_id, "Position setup missing, not resizing");
            return;
        };
        let (balance, fees) = match self.account(&position.account_id) {
            Some(account) => (account.current_balance, account.fee_schedule()),
            None => (Decimal::ZERO, self.config.fee_schedule()),
        };

        self.state.positions[idx].recalculate(&setup, balance, Some(fees));
    }

    async fn resize_open_positions(&mut self, account_id: &str) {
        let open: Vec<usize> = self
            .state
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.account_id == account_id && !p.is_closed())
            .map(|(i, _)| i)
            .collect();

        for idx in open {
            self.recalculate_at(idx);
            self.save_position_at(idx).await;
        }
    }

    fn refresh_balance(&mut self, account_id: &str) {
        let state = &mut self.state;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) {
            account.calculate_stats(&state.positions, &state.account_changes);
        }
    }

    async fn save_account(&self, id: &str) {
        if let Some(account) = self.account(id) {
            self.persist("account", || self.db.save_account(account)).await;
        }
    }

    async fn save_position_at(&self, idx: usize) {
        let position = &self.state.positions[idx];
        self.persist("position", || self.db.save_position(position)).await;
    }

    /// Run a write with retries. Failures are logged and dropped.
    async fn persist<F, Fut>(&self, what: &'static str, mut write: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(self.config.persist_retry_secs)),
            ..ExponentialBackoff::default()
        };

        let result = backoff::future::retry(policy, || {
            let attempt = write();
            async move {
                attempt.await.map_err(|e| {
                    warn!(what, error = %e, "Write failed, retrying");
                    backoff::Error::transient(e)
                })
            }
        })
        .await;

        if let Err(e) = result {
            error!(what, error = %e, "Failed to persist change");
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
