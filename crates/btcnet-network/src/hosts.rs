//! # Host Pool
//!
//! The shared address pool: gossiped peer addresses admitted through the
//! settings filters, plus the reserved set of authorities currently in use
//! by live channels (preventing concurrent duplicate dials). Mutated only
//! on the network strand; the count is atomic for read-only introspection
//! from other strands.
//!
//! Persistence round-trips through `path/hosts.cache`; the file format is a
//! collaborator concern and is treated as opaque here.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use btcnet_messages::AddressItem;

use crate::config::Authority;
use crate::error::Error;
use crate::settings::Settings;
use crate::strand::Strand;

/// Address pool with reservation-based deconfliction.
pub struct Hosts {
    settings: Arc<Settings>,
    strand: Strand,
    buffer: Mutex<VecDeque<AddressItem>>,
    reserved: Mutex<HashSet<Authority>>,
    count: AtomicUsize,
}

impl Hosts {
    pub fn new(settings: Arc<Settings>, strand: Strand) -> Self {
        Self {
            settings,
            strand,
            buffer: Mutex::new(VecDeque::new()),
            reserved: Mutex::new(HashSet::new()),
            count: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.settings.host_pool_capacity as usize
    }

    fn disabled(&self) -> bool {
        self.capacity() == 0
    }

    /// Pool size; readable from any strand.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Authorities currently reserved by live channels.
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().len()
    }

    /// Load the persisted pool. Missing file is an empty pool, not an
    /// error; an unreadable file is `FileLoad`.
    pub fn start(&self) -> Result<(), Error> {
        debug_assert!(self.strand.stranded());

        if self.disabled() {
            return Ok(());
        }

        let file = self.settings.hosts_file();
        let serialized = match fs::read_to_string(&file) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(_) => return Err(Error::FileLoad),
        };

        let items: Vec<AddressItem> =
            serde_json::from_str(&serialized).map_err(|_| Error::FileLoad)?;

        let mut buffer = self.buffer.lock();
        for item in items {
            if buffer.len() == self.capacity() {
                break;
            }
            if !self.settings.excluded(&item) {
                buffer.push_back(item);
            }
        }
        self.count.store(buffer.len(), Ordering::Release);
        info!(count = buffer.len(), "hosts loaded");
        Ok(())
    }

    /// Persist the pool. The parent directory must already exist.
    pub fn stop(&self) -> Result<(), Error> {
        if self.disabled() {
            return Ok(());
        }

        let items: Vec<AddressItem> = self.buffer.lock().iter().cloned().collect();
        let serialized = serde_json::to_string(&items).map_err(|_| Error::FileSave)?;
        fs::write(self.settings.hosts_file(), serialized).map_err(|_| Error::FileSave)?;
        info!(count = items.len(), "hosts saved");
        Ok(())
    }

    /// Remove and return one address drawn uniformly from the admissible
    /// items. Reserved authorities are skipped; excluded items found in
    /// the pool are evicted rather than returned.
    pub fn take(&self) -> Result<AddressItem, Error> {
        debug_assert!(self.strand.stranded());

        let mut buffer = self.buffer.lock();
        let reserved = self.reserved.lock();

        // Filter configuration may have tightened since admission.
        buffer.retain(|item| !self.settings.excluded(item));

        let candidates: Vec<usize> = buffer
            .iter()
            .enumerate()
            .filter(|(_, item)| !reserved.contains(&Authority::from(*item)))
            .map(|(index, _)| index)
            .collect();

        let taken = match candidates.choose(&mut rand::thread_rng()) {
            Some(&index) => Ok(buffer
                .swap_remove_back(index)
                .expect("index within bounds")),
            None => Err(Error::AddressNotFound),
        };

        self.count.store(buffer.len(), Ordering::Release);
        taken
    }

    /// Return a previously taken address to the pool.
    pub fn restore(&self, item: AddressItem) {
        debug_assert!(self.strand.stranded());

        if self.disabled() || self.settings.excluded(&item) {
            return;
        }

        let mut buffer = self.buffer.lock();
        if buffer.iter().any(|existing| existing.same_endpoint(&item)) {
            return;
        }
        if buffer.len() == self.capacity() {
            buffer.pop_front();
        }
        buffer.push_back(item);
        self.count.store(buffer.len(), Ordering::Release);
    }

    /// Store a batch of gossiped addresses; returns how many were
    /// admitted. Existing endpoints are renewed in place.
    pub fn save(&self, items: &[AddressItem]) -> usize {
        debug_assert!(self.strand.stranded());

        if self.disabled() {
            return 0;
        }

        let mut buffer = self.buffer.lock();
        let mut accepted = 0;

        for item in items {
            if self.settings.excluded(item) {
                continue;
            }

            if let Some(existing) = buffer
                .iter_mut()
                .find(|existing| existing.same_endpoint(item))
            {
                existing.timestamp = item.timestamp;
                existing.services = item.services;
                continue;
            }

            if buffer.len() == self.capacity() {
                debug!("host pool full");
                break;
            }
            buffer.push_back(item.clone());
            accepted += 1;
        }

        self.count.store(buffer.len(), Ordering::Release);
        accepted
    }

    /// Random sample of up to `limit` addresses, without removal (the
    /// `getaddr` reply).
    pub fn fetch(&self, limit: usize) -> Vec<AddressItem> {
        debug_assert!(self.strand.stranded());

        let buffer = self.buffer.lock();
        let mut items: Vec<AddressItem> = buffer.iter().cloned().collect();
        items.shuffle(&mut rand::thread_rng());
        items.truncate(limit);
        items
    }

    /// Reserve an authority for a live channel; `false` means a channel
    /// already holds it (duplicate connection).
    pub fn reserve(&self, authority: Authority) -> bool {
        debug_assert!(self.strand.stranded());
        self.reserved.lock().insert(authority)
    }

    /// Release a reservation on channel stop.
    pub fn unreserve(&self, authority: Authority) {
        debug_assert!(self.strand.stranded());
        if !self.reserved.lock().remove(&authority) {
            warn!(peer = %authority, "unreserve without reservation");
        }
    }

    /// A live channel currently holds this authority.
    pub fn is_reserved(&self, authority: &Authority) -> bool {
        self.reserved.lock().contains(authority)
    }
}
