//! In-memory script cache with explicit refresh, plus the phone-number →
//! script resolver. Scripts and mappings are created out-of-band (seed or
//! admin) and only read on the call path.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::NaiveDateTime;
use log::{info, warn};

use crate::script::document::load_script_file;
use crate::script::model::{PhoneMapping, Script, ScriptError};
use crate::store::SessionStore;

#[derive(Default)]
pub struct ScriptManager {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
    mappings: RwLock<Vec<PhoneMapping>>,
}

impl ScriptManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_script(&self, script: Script) -> Result<(), ScriptError> {
        script.validate()?;
        self.scripts
            .write()
            .unwrap()
            .insert(script.id.clone(), Arc::new(script));
        Ok(())
    }

    pub fn insert_mapping(&self, mapping: PhoneMapping) {
        self.mappings.write().unwrap().push(mapping);
    }

    pub fn load_file(&self, path: &Path) -> Result<String> {
        let script = load_script_file(path)?;
        let id = script.id.clone();
        self.insert_script(script)?;
        info!("[script] loaded {:?} from {}", id, path.display());
        Ok(id)
    }

    pub fn script(&self, id: &str) -> Option<Arc<Script>> {
        self.scripts.read().unwrap().get(id).cloned()
    }

    pub fn script_count(&self) -> usize {
        self.scripts.read().unwrap().len()
    }

    /// Resolve the script dispatched for a dialled number at `local_now`.
    /// Only active scripts are dispatched; ties break on the numerically
    /// smallest priority, then on mapping insertion order.
    pub fn resolve_by_phone(&self, number: &str, local_now: NaiveDateTime) -> Option<Arc<Script>> {
        let mappings = self.mappings.read().unwrap();
        let mut candidates: Vec<&PhoneMapping> = mappings
            .iter()
            .filter(|m| m.phone_number == number && m.matches_at(local_now))
            .collect();
        candidates.sort_by_key(|m| m.priority);

        for mapping in candidates {
            match self.script(&mapping.script_id) {
                Some(script) if script.is_active() => return Some(script),
                Some(_) => {
                    warn!(
                        "[script] mapping for {number} points at inactive script {:?}",
                        mapping.script_id
                    );
                }
                None => {
                    warn!(
                        "[script] mapping for {number} points at unknown script {:?}",
                        mapping.script_id
                    );
                }
            }
        }
        None
    }

    /// Bump the execute counter; returns a snapshot for persistence.
    pub fn mark_executed(&self, id: &str) -> Option<Script> {
        self.bump(id, |s| s.execute_count += 1)
    }

    /// Bump the success counter; returns a snapshot for persistence.
    pub fn mark_succeeded(&self, id: &str) -> Option<Script> {
        self.bump(id, |s| s.success_count += 1)
    }

    fn bump(&self, id: &str, f: impl FnOnce(&mut Script)) -> Option<Script> {
        let mut scripts = self.scripts.write().unwrap();
        let entry = scripts.get_mut(id)?;
        let mut updated = (**entry).clone();
        f(&mut updated);
        *entry = Arc::new(updated.clone());
        Some(updated)
    }

    /// Replace the cache with the store's current scripts and mappings.
    pub async fn refresh(&self, store: &dyn SessionStore) -> Result<()> {
        let scripts = store.load_scripts().await?;
        let mappings = store.load_phone_mappings().await?;

        let mut map = HashMap::new();
        for script in scripts {
            if let Err(e) = script.validate() {
                warn!("[script] skipping invalid script {:?}: {e}", script.name);
                continue;
            }
            map.insert(script.id.clone(), Arc::new(script));
        }
        let count = map.len();
        *self.scripts.write().unwrap() = map;
        *self.mappings.write().unwrap() = mappings;
        info!("[script] cache refreshed, {count} scripts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::model::{PlayAudioData, ScriptStatus, Step, StepData};

    fn script(id: &str, status: ScriptStatus) -> Script {
        Script {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            version: "1.0.0".into(),
            status,
            speaker_id: "1".into(),
            start_step_id: "a".into(),
            max_duration_ms: 300_000,
            max_steps: 20,
            steps: vec![Step {
                id: "a".into(),
                group_id: "main".into(),
                order: 0,
                data: StepData::PlayAudio(PlayAudioData {
                    audio_text: Some("hi".into()),
                    ..Default::default()
                }),
            }],
            execute_count: 0,
            success_count: 0,
        }
    }

    fn mapping(script_id: &str, number: &str, priority: i32) -> PhoneMapping {
        PhoneMapping {
            script_id: script_id.into(),
            phone_number: number.into(),
            priority,
            enabled: true,
            description: String::new(),
            start_time: None,
            end_time: None,
            week_days: None,
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-07-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn resolves_smallest_priority_first() {
        let mgr = ScriptManager::new();
        mgr.insert_script(script("low", ScriptStatus::Active)).unwrap();
        mgr.insert_script(script("high", ScriptStatus::Active)).unwrap();
        mgr.insert_mapping(mapping("low", "10086", 5));
        mgr.insert_mapping(mapping("high", "10086", 1));
        let resolved = mgr.resolve_by_phone("10086", noon()).unwrap();
        assert_eq!(resolved.id, "high");
    }

    #[test]
    fn inactive_scripts_are_not_dispatched() {
        let mgr = ScriptManager::new();
        mgr.insert_script(script("draft", ScriptStatus::Draft)).unwrap();
        mgr.insert_mapping(mapping("draft", "10086", 1));
        assert!(mgr.resolve_by_phone("10086", noon()).is_none());
    }

    #[test]
    fn unknown_number_resolves_to_none() {
        let mgr = ScriptManager::new();
        assert!(mgr.resolve_by_phone("99999", noon()).is_none());
    }

    #[test]
    fn counters_are_bumped_on_snapshots() {
        let mgr = ScriptManager::new();
        mgr.insert_script(script("s", ScriptStatus::Active)).unwrap();
        let snap = mgr.mark_executed("s").unwrap();
        assert_eq!(snap.execute_count, 1);
        let snap = mgr.mark_succeeded("s").unwrap();
        assert_eq!(snap.success_count, 1);
        assert_eq!(mgr.script("s").unwrap().execute_count, 1);
    }
}
