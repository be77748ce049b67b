//! Simulated ONTAP Array
//!
//! An in-memory [`OntapApi`] used for standalone mode and tests. Replies use
//! the same error codes a real array sends, quota transitions take a
//! configurable number of status polls to settle, async qtree destroys can be
//! held back, and faults can be queued per operation.

use crate::domain::ports::{
    ApiFailure, ApiReply, DiskLimit, ErrorCode, ExportRule, FlexvolCreateSpec, FlexvolInfo, OntapApi,
    PoolAttributes, QtreeCreateSpec, QtreeInfo, QuotaEntry, QuotaStatus, VolumeSize,
};
use crate::economy::naming::FLEXVOL_PLACEHOLDER_BYTES;
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Behavior knobs for [`SimulatedArray`]
#[derive(Debug, Clone)]
pub struct SimulatedArrayConfig {
    /// Status polls a quota transition reports before settling
    pub quota_transition_polls: u32,
    /// Quota status of new Flexvols
    pub initial_quota_status: QuotaStatus,
    /// Snapshot reserve applied when a create request leaves it unset
    pub default_snapshot_reserve: u32,
    /// Keep async qtree destroys pending until completed explicitly
    pub hold_async_destroys: bool,
}

impl Default for SimulatedArrayConfig {
    fn default() -> Self {
        Self {
            quota_transition_polls: 0,
            initial_quota_status: QuotaStatus::Off,
            default_snapshot_reserve: 5,
            hold_async_destroys: false,
        }
    }
}

/// A failure queued for the next call of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The call never gets a reply
    Transport,
    /// The array answers with this error code
    Api(ErrorCode),
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct SimFlexvol {
    info: FlexvolInfo,
    qtrees: BTreeSet<String>,
    quotas: BTreeMap<Option<String>, DiskLimit>,
    quota_status: QuotaStatus,
    /// Status the quota subsystem settles into, and the polls left until then
    settling: Option<(QuotaStatus, u32)>,
}

#[derive(Debug, Default)]
struct SimState {
    flexvols: BTreeMap<String, SimFlexvol>,
    export_policies: BTreeMap<String, Vec<String>>,
    pending_destroys: BTreeSet<(String, String)>,
    hold_async_destroys: bool,
}

impl SimState {
    fn flexvol_mut(&mut self, name: &str) -> std::result::Result<&mut SimFlexvol, ApiFailure> {
        self.flexvols.get_mut(name).ok_or_else(|| volume_missing(name))
    }
}

fn volume_missing(name: &str) -> ApiFailure {
    ApiFailure::new(
        ErrorCode::VolumeDoesNotExist,
        format!("Volume \"{}\" does not exist", name),
    )
}

fn object_missing(what: &str) -> ApiFailure {
    ApiFailure::new(ErrorCode::ObjectNotFound, format!("{} not found", what))
}

fn respond<T>(result: std::result::Result<T, ApiFailure>) -> Result<ApiReply<T>> {
    Ok(match result {
        Ok(value) => ApiReply::Passed(value),
        Err(failure) => ApiReply::Failed(failure),
    })
}

// =============================================================================
// Simulated Array
// =============================================================================

pub struct SimulatedArray {
    config: SimulatedArrayConfig,
    state: Mutex<SimState>,
    faults: DashMap<&'static str, VecDeque<Fault>>,
    calls: DashMap<&'static str, u64>,
}

impl Default for SimulatedArray {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedArray {
    pub fn new() -> Self {
        Self::with_config(SimulatedArrayConfig::default())
    }

    pub fn with_config(config: SimulatedArrayConfig) -> Self {
        let state = SimState {
            hold_async_destroys: config.hold_async_destroys,
            ..Default::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            faults: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// Count the call and apply the next queued fault, if any
    fn intercept<T>(&self, operation: &'static str) -> Result<Option<ApiReply<T>>> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let fault = self
            .faults
            .get_mut(operation)
            .and_then(|mut queue| queue.pop_front());

        match fault {
            None => Ok(None),
            Some(Fault::Transport) => {
                debug!(operation, "Injected transport failure");
                Err(Error::transport(operation, "simulated connection reset"))
            }
            Some(Fault::Api(code)) => {
                debug!(operation, %code, "Injected API failure");
                Ok(Some(ApiReply::failed(code, "simulated failure")))
            }
        }
    }

    fn new_flexvol(&self, info: FlexvolInfo) -> SimFlexvol {
        SimFlexvol {
            info,
            qtrees: BTreeSet::new(),
            quotas: BTreeMap::new(),
            quota_status: self.config.initial_quota_status,
            settling: None,
        }
    }

    /// Begin a quota transition through `via` that settles at `target`
    fn transition(&self, flexvol: &mut SimFlexvol, via: QuotaStatus, target: QuotaStatus) {
        if self.config.quota_transition_polls == 0 {
            flexvol.quota_status = target;
            flexvol.settling = None;
        } else {
            flexvol.quota_status = via;
            flexvol.settling = Some((target, self.config.quota_transition_polls));
        }
    }

    fn remove_qtree(state: &mut SimState, flexvol: &str, name: &str) {
        if let Some(vol) = state.flexvols.get_mut(flexvol) {
            vol.qtrees.remove(name);
            vol.quotas.remove(&Some(name.to_string()));
        }
    }

    // =========================================================================
    // Test & Inspection Helpers
    // =========================================================================

    /// Queue a fault for the next call of `operation`
    pub fn inject(&self, operation: &'static str, fault: Fault) {
        self.faults.entry(operation).or_default().push_back(fault);
    }

    /// Number of calls made to `operation`, faulted ones included
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls.get(operation).map(|count| *count).unwrap_or(0)
    }

    /// Add an existing Flexvol with the placeholder size
    pub fn seed_flexvol(&self, name: &str, attributes: PoolAttributes) {
        let info = FlexvolInfo {
            name: name.to_string(),
            attributes,
            size_bytes: FLEXVOL_PLACEHOLDER_BYTES,
            snapshot_reserve_percent: self.config.default_snapshot_reserve,
            junction_path: Some(format!("/{}", name)),
        };
        let flexvol = self.new_flexvol(info);
        self.state.lock().flexvols.insert(name.to_string(), flexvol);
    }

    /// Add `count` filler qtrees to a Flexvol
    pub fn seed_qtrees(&self, flexvol: &str, count: usize) {
        let mut state = self.state.lock();
        if let Some(vol) = state.flexvols.get_mut(flexvol) {
            let mut index = vol.qtrees.len();
            let mut added = 0;
            while added < count {
                if vol.qtrees.insert(format!("seeded_{}", index)) {
                    added += 1;
                }
                index += 1;
            }
        }
    }

    pub fn set_snapshot_reserve(&self, flexvol: &str, percent: u32) {
        if let Some(vol) = self.state.lock().flexvols.get_mut(flexvol) {
            vol.info.snapshot_reserve_percent = percent;
        }
    }

    /// Force a quota status, cancelling any transition in flight
    pub fn set_quota_status(&self, flexvol: &str, status: QuotaStatus) {
        if let Some(vol) = self.state.lock().flexvols.get_mut(flexvol) {
            vol.quota_status = status;
            vol.settling = None;
        }
    }

    pub fn hold_async_destroys(&self, hold: bool) {
        self.state.lock().hold_async_destroys = hold;
    }

    /// Finish every held async destroy; returns how many completed
    pub fn complete_async_destroys(&self) -> usize {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending_destroys);
        for (flexvol, name) in &pending {
            Self::remove_qtree(&mut state, flexvol, name);
        }
        pending.len()
    }

    pub fn flexvol(&self, name: &str) -> Option<FlexvolInfo> {
        self.state.lock().flexvols.get(name).map(|vol| vol.info.clone())
    }

    pub fn flexvol_names(&self) -> Vec<String> {
        self.state.lock().flexvols.keys().cloned().collect()
    }

    pub fn qtrees(&self, flexvol: &str) -> Vec<String> {
        self.state
            .lock()
            .flexvols
            .get(flexvol)
            .map(|vol| vol.qtrees.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn quota_entries(&self, flexvol: &str) -> Vec<QuotaEntry> {
        self.state
            .lock()
            .flexvols
            .get(flexvol)
            .map(|vol| quota_entries_of(flexvol, vol))
            .unwrap_or_default()
    }

    pub fn export_rules(&self, policy: &str) -> Vec<String> {
        self.state
            .lock()
            .export_policies
            .get(policy)
            .cloned()
            .unwrap_or_default()
    }
}

fn quota_entries_of(flexvol: &str, vol: &SimFlexvol) -> Vec<QuotaEntry> {
    vol.quotas
        .iter()
        .map(|(qtree, limit)| QuotaEntry {
            flexvol: flexvol.to_string(),
            qtree: qtree.clone(),
            disk_limit: *limit,
        })
        .collect()
}

// =============================================================================
// OntapApi
// =============================================================================

#[async_trait]
impl OntapApi for SimulatedArray {
    async fn volume_create(&self, spec: &FlexvolCreateSpec) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("volume-create")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        if state.flexvols.contains_key(&spec.name) {
            return respond(Err(ApiFailure::new(
                ErrorCode::AlreadyExists,
                format!("Volume \"{}\" already exists", spec.name),
            )));
        }

        let info = FlexvolInfo {
            name: spec.name.clone(),
            attributes: spec.attributes.clone(),
            size_bytes: spec.size_bytes,
            snapshot_reserve_percent: spec
                .snapshot_reserve_percent
                .unwrap_or(self.config.default_snapshot_reserve),
            junction_path: None,
        };
        let flexvol = self.new_flexvol(info);
        state.flexvols.insert(spec.name.clone(), flexvol);
        respond(Ok(()))
    }

    async fn volume_destroy(&self, name: &str, force: bool) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("volume-destroy")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        let busy = match state.flexvols.get(name) {
            None => return respond(Err(volume_missing(name))),
            Some(vol) => !vol.qtrees.is_empty(),
        };
        if busy && !force {
            return respond(Err(ApiFailure::new(
                ErrorCode::ApiError,
                format!("Volume \"{}\" still holds qtrees", name),
            )));
        }

        state.flexvols.remove(name);
        state.pending_destroys.retain(|(flexvol, _)| flexvol != name);
        respond(Ok(()))
    }

    async fn volume_list(&self, prefix: &str) -> Result<ApiReply<Vec<String>>> {
        if let Some(reply) = self.intercept("volume-list")? {
            return Ok(reply);
        }

        let state = self.state.lock();
        respond(Ok(state
            .flexvols
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()))
    }

    async fn volume_list_by_attrs(
        &self,
        prefix: &str,
        attributes: &PoolAttributes,
    ) -> Result<ApiReply<Vec<String>>> {
        if let Some(reply) = self.intercept("volume-list-by-attrs")? {
            return Ok(reply);
        }

        let state = self.state.lock();
        respond(Ok(state
            .flexvols
            .iter()
            .filter(|(name, vol)| name.starts_with(prefix) && vol.info.attributes == *attributes)
            .map(|(name, _)| name.clone())
            .collect()))
    }

    async fn volume_mount(&self, name: &str, junction_path: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("volume-mount")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(name).map(|vol| {
            vol.info.junction_path = Some(junction_path.to_string());
        }))
    }

    async fn volume_get(&self, name: &str) -> Result<ApiReply<FlexvolInfo>> {
        if let Some(reply) = self.intercept("volume-get")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(name).map(|vol| vol.info.clone()))
    }

    async fn volume_set_size(&self, name: &str, size: VolumeSize) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("volume-set-size")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(name).map(|vol| {
            vol.info.size_bytes = match size {
                VolumeSize::Absolute(bytes) => bytes,
                VolumeSize::Grow(bytes) => vol.info.size_bytes.saturating_add(bytes),
            };
        }))
    }

    async fn qtree_create(&self, spec: &QtreeCreateSpec) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("qtree-create")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(&spec.flexvol).and_then(|vol| {
            if vol.qtrees.insert(spec.name.clone()) {
                Ok(())
            } else {
                Err(ApiFailure::new(
                    ErrorCode::AlreadyExists,
                    format!("Qtree \"{}\" already exists", spec.name),
                ))
            }
        }))
    }

    async fn qtree_exists(&self, name: &str, flexvol_prefix: &str) -> Result<ApiReply<Option<String>>> {
        if let Some(reply) = self.intercept("qtree-exists")? {
            return Ok(reply);
        }

        let state = self.state.lock();
        respond(Ok(state
            .flexvols
            .iter()
            .find(|(flexvol, vol)| flexvol.starts_with(flexvol_prefix) && vol.qtrees.contains(name))
            .map(|(flexvol, _)| flexvol.clone())))
    }

    async fn qtree_list(&self, name_prefix: &str, flexvol_prefix: &str) -> Result<ApiReply<Vec<QtreeInfo>>> {
        if let Some(reply) = self.intercept("qtree-list")? {
            return Ok(reply);
        }

        let state = self.state.lock();
        let qtrees = state
            .flexvols
            .iter()
            .filter(|(flexvol, _)| flexvol.starts_with(flexvol_prefix))
            .flat_map(|(flexvol, vol)| {
                vol.qtrees
                    .iter()
                    .filter(move |name| name.starts_with(name_prefix))
                    .map(move |name| QtreeInfo {
                        name: name.clone(),
                        flexvol: flexvol.clone(),
                    })
            })
            .collect();
        respond(Ok(qtrees))
    }

    async fn qtree_rename(&self, flexvol: &str, from: &str, to: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("qtree-rename")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).and_then(|vol| {
            if !vol.qtrees.contains(from) {
                return Err(object_missing(&format!("Qtree \"{}\"", from)));
            }
            if vol.qtrees.contains(to) {
                return Err(ApiFailure::new(
                    ErrorCode::DuplicateEntry,
                    format!("Qtree \"{}\" already exists", to),
                ));
            }
            vol.qtrees.remove(from);
            vol.qtrees.insert(to.to_string());
            if let Some(limit) = vol.quotas.remove(&Some(from.to_string())) {
                vol.quotas.insert(Some(to.to_string()), limit);
            }
            Ok(())
        }))
    }

    async fn qtree_destroy_async(&self, flexvol: &str, name: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("qtree-destroy-async")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        let exists = match state.flexvols.get(flexvol) {
            None => return respond(Err(volume_missing(flexvol))),
            Some(vol) => vol.qtrees.contains(name),
        };
        if !exists {
            return respond(Err(object_missing(&format!("Qtree \"{}\"", name))));
        }

        if state.hold_async_destroys {
            state
                .pending_destroys
                .insert((flexvol.to_string(), name.to_string()));
        } else {
            Self::remove_qtree(&mut state, flexvol, name);
        }
        respond(Ok(()))
    }

    async fn qtree_count(&self, flexvol: &str) -> Result<ApiReply<usize>> {
        if let Some(reply) = self.intercept("qtree-count")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).map(|vol| vol.qtrees.len()))
    }

    async fn quota_set_entry(&self, entry: &QuotaEntry) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("quota-set-entry")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(&entry.flexvol).map(|vol| {
            vol.quotas.insert(entry.qtree.clone(), entry.disk_limit);
        }))
    }

    async fn quota_get_entry(&self, flexvol: &str, qtree: &str) -> Result<ApiReply<QuotaEntry>> {
        if let Some(reply) = self.intercept("quota-get-entry")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).and_then(|vol| {
            vol.quotas
                .get(&Some(qtree.to_string()))
                .map(|limit| QuotaEntry {
                    flexvol: flexvol.to_string(),
                    qtree: Some(qtree.to_string()),
                    disk_limit: *limit,
                })
                .ok_or_else(|| object_missing(&format!("Quota entry for qtree \"{}\"", qtree)))
        }))
    }

    async fn quota_entry_list(&self, flexvol: &str) -> Result<ApiReply<Vec<QuotaEntry>>> {
        if let Some(reply) = self.intercept("quota-entry-list")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).map(|vol| quota_entries_of(flexvol, vol)))
    }

    async fn quota_on(&self, flexvol: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("quota-on")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).and_then(|vol| {
            if vol.quota_status != QuotaStatus::Off {
                return Err(ApiFailure::new(
                    ErrorCode::ApiError,
                    format!("Quotas are {} on \"{}\"", vol.quota_status, flexvol),
                ));
            }
            self.transition(vol, QuotaStatus::Initializing, QuotaStatus::On);
            Ok(())
        }))
    }

    async fn quota_off(&self, flexvol: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("quota-off")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).and_then(|vol| {
            if matches!(vol.quota_status, QuotaStatus::Off | QuotaStatus::Quitting) {
                return Err(ApiFailure::new(
                    ErrorCode::ApiError,
                    format!("Quotas are already {} on \"{}\"", vol.quota_status, flexvol),
                ));
            }
            self.transition(vol, QuotaStatus::Quitting, QuotaStatus::Off);
            Ok(())
        }))
    }

    async fn quota_status(&self, flexvol: &str) -> Result<ApiReply<QuotaStatus>> {
        if let Some(reply) = self.intercept("quota-status")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).map(|vol| {
            let observed = vol.quota_status;
            vol.settling = match vol.settling.take() {
                Some((target, 0)) => {
                    vol.quota_status = target;
                    None
                }
                Some((target, polls)) => Some((target, polls - 1)),
                None => None,
            };
            observed
        }))
    }

    async fn quota_resize(&self, flexvol: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("quota-resize")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(state.flexvol_mut(flexvol).map(|vol| {
            if vol.quota_status == QuotaStatus::On {
                self.transition(vol, QuotaStatus::Resizing, QuotaStatus::On);
            }
        }))
    }

    async fn export_policy_create(&self, policy: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("export-policy-create")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        if state.export_policies.contains_key(policy) {
            return respond(Err(ApiFailure::new(
                ErrorCode::DuplicateEntry,
                format!("Export policy \"{}\" already exists", policy),
            )));
        }
        state.export_policies.insert(policy.to_string(), Vec::new());
        respond(Ok(()))
    }

    async fn export_rule_create(&self, policy: &str, client_match: &str) -> Result<ApiReply<()>> {
        if let Some(reply) = self.intercept("export-rule-create")? {
            return Ok(reply);
        }

        let mut state = self.state.lock();
        respond(
            state
                .export_policies
                .get_mut(policy)
                .map(|rules| rules.push(client_match.to_string()))
                .ok_or_else(|| object_missing(&format!("Export policy \"{}\"", policy))),
        )
    }

    async fn export_rule_list(&self, policy: &str) -> Result<ApiReply<Vec<ExportRule>>> {
        if let Some(reply) = self.intercept("export-rule-list")? {
            return Ok(reply);
        }

        let state = self.state.lock();
        respond(
            state
                .export_policies
                .get(policy)
                .map(|rules| {
                    rules
                        .iter()
                        .map(|client_match| ExportRule {
                            policy: policy.to_string(),
                            client_match: client_match.clone(),
                        })
                        .collect()
                })
                .ok_or_else(|| object_missing(&format!("Export policy \"{}\"", policy))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_codes() {
        let array = SimulatedArray::new();

        let reply = array.volume_destroy("missing", true).await.unwrap();
        assert_eq!(reply.code(), Some(&ErrorCode::VolumeDoesNotExist));

        array.export_policy_create("default").await.unwrap();
        let reply = array.export_policy_create("default").await.unwrap();
        assert_eq!(reply.code(), Some(&ErrorCode::DuplicateEntry));

        array.seed_flexvol("vol_a", PoolAttributes::default());
        array.seed_qtrees("vol_a", 2);
        let reply = array.qtree_rename("vol_a", "seeded_0", "seeded_1").await.unwrap();
        assert_eq!(reply.code(), Some(&ErrorCode::DuplicateEntry));
        let reply = array.qtree_rename("vol_a", "nope", "other").await.unwrap();
        assert_eq!(reply.code(), Some(&ErrorCode::ObjectNotFound));

        let reply = array.volume_destroy("vol_a", false).await.unwrap();
        assert_eq!(reply.code(), Some(&ErrorCode::ApiError));
    }

    #[tokio::test]
    async fn test_quota_transitions_settle_after_polls() {
        let array = SimulatedArray::with_config(SimulatedArrayConfig {
            quota_transition_polls: 2,
            ..Default::default()
        });
        array.seed_flexvol("vol_a", PoolAttributes::default());

        assert!(array.quota_on("vol_a").await.unwrap().is_passed());
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(array.quota_status("vol_a").await.unwrap().into_result("s").unwrap());
        }
        assert_eq!(
            seen,
            vec![
                QuotaStatus::Initializing,
                QuotaStatus::Initializing,
                QuotaStatus::Initializing,
                QuotaStatus::On
            ]
        );

        assert!(!array.quota_on("vol_a").await.unwrap().is_passed());
    }

    #[tokio::test]
    async fn test_faults_and_held_destroys() {
        let array = SimulatedArray::with_config(SimulatedArrayConfig {
            hold_async_destroys: true,
            ..Default::default()
        });
        array.seed_flexvol("vol_a", PoolAttributes::default());
        array.seed_qtrees("vol_a", 1);

        array.inject("qtree-destroy-async", Fault::Transport);
        assert!(array.qtree_destroy_async("vol_a", "seeded_0").await.is_err());

        assert!(array
            .qtree_destroy_async("vol_a", "seeded_0")
            .await
            .unwrap()
            .is_passed());
        assert_eq!(array.qtrees("vol_a").len(), 1);
        assert_eq!(array.complete_async_destroys(), 1);
        assert!(array.qtrees("vol_a").is_empty());
        assert_eq!(array.calls("qtree-destroy-async"), 2);
    }
}
