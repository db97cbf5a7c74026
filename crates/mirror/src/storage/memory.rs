//! In-memory storage implementation
//!
//! Used by tests and dry runs. Same semantics as the SQLite store; all state
//! sits behind one lock so each `apply_message` is atomic.

use anyhow::{Result, anyhow, bail};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{ApplyOutcome, MailStore};
use crate::models::{Account, EmailAddress, Message, MessageId, Thread, ThreadId};

#[derive(Default)]
struct State {
    accounts: BTreeMap<String, Account>,
    addresses: HashMap<String, EmailAddress>,
    threads: HashMap<ThreadId, Thread>,
    messages: HashMap<MessageId, Message>,
    /// thread -> emails with access
    access: HashMap<ThreadId, BTreeSet<String>>,
}

/// In-memory implementation of MailStore
#[derive(Default)]
pub struct InMemoryMailStore {
    state: RwLock<State>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_account(&self, account: &Account) -> Result<()> {
        let mut state = self.write()?;
        let created_at = state
            .accounts
            .get(&account.user_id)
            .map(|existing| existing.created_at)
            .unwrap_or(account.created_at);
        state.accounts.insert(
            account.user_id.clone(),
            Account {
                created_at,
                ..account.clone()
            },
        );
        Ok(())
    }

    fn get_account(&self, user_id: &str) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(user_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.read()?.accounts.values().cloned().collect())
    }

    fn save_cursors(
        &self,
        user_id: &str,
        updated_cursor: Option<&str>,
        deleted_cursor: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let Some(account) = state.accounts.get_mut(user_id) else {
            bail!("no account registered for {}", user_id);
        };
        account.updated_cursor = updated_cursor.map(str::to_string);
        account.deleted_cursor = deleted_cursor.map(str::to_string);
        Ok(())
    }

    fn apply_message(&self, message: &Message) -> Result<ApplyOutcome> {
        // Validate before touching state so a failure writes nothing
        if let Some(bad) = message.participants().find(|a| a.email.is_empty()) {
            bail!("Failed to resolve address {:?}", bad.email);
        }

        let mut guard = self.write()?;
        let state = &mut *guard;
        let mut outcome = ApplyOutcome::default();

        for address in message.participants() {
            let entry = state
                .addresses
                .entry(address.email.clone())
                .or_insert_with(|| EmailAddress::new(address.email.clone()));
            if address.name.is_some() {
                entry.name = address.name.clone();
            }
        }

        match state.threads.get_mut(&message.thread_id) {
            None => {
                state
                    .threads
                    .insert(message.thread_id.clone(), Thread::from_message(message));
                outcome.thread_created = true;
            }
            Some(thread) => outcome.thread_updated = thread.absorb(message),
        }

        if !state.messages.contains_key(&message.id) {
            // stored rows resolve names through the address table
            let mut stored = message.clone();
            let resolve = |a: &EmailAddress, addresses: &HashMap<String, EmailAddress>| {
                addresses.get(&a.email).cloned().unwrap_or_else(|| a.clone())
            };
            stored.from = resolve(&message.from, &state.addresses);
            for list in [&mut stored.to, &mut stored.cc, &mut stored.bcc, &mut stored.reply_to] {
                for address in list.iter_mut() {
                    *address = resolve(&*address, &state.addresses);
                }
            }
            let mut seen = BTreeSet::new();
            stored.labels.retain(|l| seen.insert(l.clone()));

            state.messages.insert(message.id.clone(), stored);
            outcome.message_created = true;
        }

        let members = state.access.entry(message.thread_id.clone()).or_default();
        for address in message.participants() {
            if members.insert(address.email.clone()) {
                outcome.members_added += 1;
            }
        }

        Ok(outcome)
    }

    fn delete_messages(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.write()?;
        Ok(ids
            .iter()
            .filter(|id| state.messages.remove(*id).is_some())
            .count())
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        Ok(self.read()?.threads.get(id).cloned())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.messages.get(id).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.messages.contains_key(id))
    }

    fn get_address(&self, email: &str) -> Result<Option<EmailAddress>> {
        Ok(self
            .read()?
            .addresses
            .get(&email.trim().to_lowercase())
            .cloned())
    }

    fn thread_members(&self, thread_id: &ThreadId) -> Result<Vec<EmailAddress>> {
        let state = self.read()?;
        let Some(members) = state.access.get(thread_id) else {
            return Ok(Vec::new());
        };
        Ok(members
            .iter()
            .filter_map(|email| state.addresses.get(email).cloned())
            .collect())
    }

    fn list_threads_for_address(
        &self,
        email: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Thread>> {
        let email = email.trim().to_lowercase();
        let state = self.read()?;

        let mut threads: Vec<&Thread> = state
            .access
            .iter()
            .filter(|(_, members)| members.contains(&email))
            .filter_map(|(id, _)| state.threads.get(id))
            .collect();
        threads.sort_by_key(|t| (Reverse(t.last_message_date), t.id.clone()));

        Ok(threads
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn list_messages_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let state = self.read()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| &m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.received_at.cmp(&b.received_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.messages.len())
    }

    fn count_threads(&self) -> Result<usize> {
        Ok(self.read()?.threads.len())
    }

    fn count_addresses(&self) -> Result<usize> {
        Ok(self.read()?.addresses.len())
    }
}
