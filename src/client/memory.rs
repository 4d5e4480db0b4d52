//! WD-011: In-memory platform, a public test double.
//!
//! Records every mutating call as a short line (`PUT action p/a`) and every
//! read (`LIST action p`, `GET action p/a`) in a separate log, and can inject
//! failures for a given call line. `seed`, `fail`, `calls` and `reads` exist
//! for tests of code written against [`WhiskClient`].

use super::{ClientError, ClientResult, RemoteEntity, WhiskClient};
use crate::core::types::*;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    /// Keyed by kind and namespace-relative name.
    entities: IndexMap<(EntityKind, String), RemoteEntity>,
    apis: Vec<ApiRoute>,
    calls: Vec<String>,
    reads: Vec<String>,
    /// Remaining failures per call line.
    faults: HashMap<String, (u32, ClientError)>,
}

/// Thread-safe fake of the platform.
#[derive(Debug)]
pub struct MemoryClient {
    namespace: String,
    state: Mutex<State>,
}

impl MemoryClient {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Pre-populate a remote entity (not recorded as a call).
    pub fn seed(&self, entity: RemoteEntity) {
        let kind = entity.kind.unwrap_or(EntityKind::Action);
        let key = (kind, entity.relative_name());
        self.lock().entities.insert(key, entity);
    }

    /// Fail the next `times` calls whose line equals `call`.
    pub fn fail(&self, call: &str, times: u32, error: ClientError) {
        self.lock().faults.insert(call.to_string(), (times, error));
    }

    /// Mutating calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Read calls in order.
    pub fn reads(&self) -> Vec<String> {
        self.lock().reads.clone()
    }

    /// Namespace-relative names of stored entities of a kind.
    pub fn names(&self, kind: EntityKind) -> Vec<String> {
        self.lock()
            .entities
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn entity(&self, kind: EntityKind, name: &str) -> Option<RemoteEntity> {
        self.lock().entities.get(&(kind, name.to_string())).cloned()
    }

    pub fn apis(&self) -> Vec<ApiRoute> {
        self.lock().apis.clone()
    }

    /// Record a call and apply any injected fault.
    fn record(&self, state: &mut State, call: String) -> ClientResult<()> {
        state.calls.push(call.clone());
        if let Some((remaining, error)) = state.faults.get_mut(&call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn scoped(&self, package: Option<&str>) -> String {
        match package {
            Some(pkg) => format!("{}/{}", self.namespace, pkg),
            None => self.namespace.clone(),
        }
    }

    fn store(&self, state: &mut State, kind: EntityKind, package: Option<&str>, name: &str) -> RemoteEntity {
        let entity = RemoteEntity::new(kind, &self.scoped(package), name);
        let key = (kind, entity.relative_name());
        state.entities.insert(key, entity.clone());
        entity
    }
}

impl WhiskClient for MemoryClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn list(&self, kind: EntityKind, package: Option<&str>) -> ClientResult<Vec<RemoteEntity>> {
        let mut state = self.lock();
        let line = match package {
            Some(pkg) => format!("LIST {} {}", kind, pkg),
            None => format!("LIST {}", kind),
        };
        state.reads.push(line.clone());
        if let Some((remaining, error)) = state.faults.get_mut(&line) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(state
            .entities
            .iter()
            .filter(|((k, _), e)| *k == kind && package.is_none_or(|p| e.package() == Some(p)))
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn put_package(&self, package: &Package) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(&mut state, format!("PUT package {}", package.name))?;
        let mut entity = RemoteEntity::new(EntityKind::Package, &self.namespace, &package.name);
        entity.publish = package.publish;
        entity.annotations = package.annotations.clone();
        entity.parameters = params_to_wire(&package.parameters);
        entity.binding = package.binding.clone();
        state
            .entities
            .insert((EntityKind::Package, package.name.clone()), entity);
        Ok(())
    }

    fn put_action(&self, package: Option<&str>, action: &Action) -> ClientResult<()> {
        let mut state = self.lock();
        let name = match package {
            Some(pkg) => format!("{}/{}", pkg, action.name),
            None => action.name.clone(),
        };
        self.record(&mut state, format!("PUT action {}", name))?;
        let mut entity = self.store(&mut state, EntityKind::Action, package, &action.name);
        entity.publish = action.publish;
        entity.annotations = action.annotations.clone();
        entity.parameters = params_to_wire(&action.parameters);
        entity.exec = Some(action.exec.clone());
        state.entities.insert((EntityKind::Action, name), entity);
        Ok(())
    }

    fn put_trigger(&self, trigger: &Trigger) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(&mut state, format!("PUT trigger {}", trigger.name))?;
        let mut entity = self.store(&mut state, EntityKind::Trigger, None, &trigger.name);
        entity.annotations = trigger.annotations.clone();
        entity.parameters = params_to_wire(&trigger.parameters);
        state
            .entities
            .insert((EntityKind::Trigger, trigger.name.clone()), entity);
        Ok(())
    }

    fn put_rule(&self, rule: &Rule) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(&mut state, format!("PUT rule {}", rule.name))?;
        let mut entity = self.store(&mut state, EntityKind::Rule, None, &rule.name);
        entity.annotations = rule.annotations.clone();
        entity.trigger = Some(rule.trigger.clone());
        entity.action = Some(rule.action.clone());
        state.entities.insert((EntityKind::Rule, rule.name.clone()), entity);
        Ok(())
    }

    fn set_rule_state(&self, name: &str, active: bool) -> ClientResult<()> {
        let mut state = self.lock();
        let status = if active { "active" } else { "inactive" };
        self.record(&mut state, format!("STATE rule {} {}", name, status))
    }

    fn delete(&self, kind: EntityKind, name: &str) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(&mut state, format!("DELETE {} {}", kind, name))?;
        match state.entities.shift_remove(&(kind, name.to_string())) {
            Some(_) => Ok(()),
            None => Err(ClientError::not_found(&format!("{} {}", kind, name))),
        }
    }

    fn invoke_feed(&self, feed: &str, params: &serde_json::Value) -> ClientResult<()> {
        let mut state = self.lock();
        let event = params
            .get("lifecycleEvent")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        self.record(&mut state, format!("FEED {} {}", feed, event))
    }

    fn get_action(&self, name: &str) -> ClientResult<RemoteEntity> {
        let mut state = self.lock();
        state.reads.push(format!("GET action {}", name));
        let found = state.entities.get(&(EntityKind::Action, name.to_string())).cloned();
        found.ok_or_else(|| ClientError::not_found(&format!("action {}", name)))
    }

    fn put_api(&self, route: &ApiRoute) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(
            &mut state,
            format!("PUT api {}{} {}", route.base_path, route.rel_path, route.method),
        )?;
        state.apis.retain(|r| {
            (&r.base_path, &r.rel_path, &r.method) != (&route.base_path, &route.rel_path, &route.method)
        });
        state.apis.push(route.clone());
        Ok(())
    }

    fn delete_api(&self, route: &ApiRoute) -> ClientResult<()> {
        let mut state = self.lock();
        self.record(
            &mut state,
            format!("DELETE api {}{} {}", route.base_path, route.rel_path, route.method),
        )?;
        state.apis.retain(|r| r != route);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wd011_mem_put_and_list() {
        let client = MemoryClient::new("guest");
        let action = Action {
            name: "a".into(),
            ..Default::default()
        };
        client.put_action(Some("p"), &action).unwrap();
        client.put_action(None, &action).unwrap();
        assert_eq!(client.calls(), vec!["PUT action p/a", "PUT action a"]);
        assert_eq!(client.list(EntityKind::Action, Some("p")).unwrap().len(), 1);
        assert_eq!(client.list(EntityKind::Action, None).unwrap().len(), 2);
        assert_eq!(client.names(EntityKind::Action), vec!["p/a", "a"]);
        assert!(client.get_action("p/a").is_ok());
    }

    #[test]
    fn test_wd011_mem_fault_injection() {
        let client = MemoryClient::new("guest");
        client.fail("PUT trigger t", 1, ClientError::new(Some(503), "busy"));
        let trigger = Trigger {
            name: "t".into(),
            ..Default::default()
        };
        assert!(client.put_trigger(&trigger).is_err());
        assert!(client.put_trigger(&trigger).is_ok());
        assert_eq!(client.calls().len(), 2);
    }

    #[test]
    fn test_wd011_mem_delete_missing() {
        let client = MemoryClient::new("guest");
        let err = client.delete(EntityKind::Rule, "r").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wd011_mem_reads_logged_apart() {
        let client = MemoryClient::new("guest");
        client.list(EntityKind::Action, Some("p")).unwrap();
        assert!(client.get_action("p/a").is_err());
        assert_eq!(client.reads(), vec!["LIST action p", "GET action p/a"]);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_wd011_mem_seed_not_recorded() {
        let client = MemoryClient::new("guest");
        client.seed(RemoteEntity::new(EntityKind::Package, "guest", "p"));
        assert!(client.calls().is_empty());
        assert_eq!(client.names(EntityKind::Package), vec!["p"]);
    }
}
