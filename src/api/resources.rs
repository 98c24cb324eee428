//! Purpose: Typed read-only views over common service entities.
//! Exports: `LicensePool`, `Quota`, `ClusterPeer`, `AlertGroup`, `AppSetup`.
//! Role: Thin accessors that name and coerce well-known `Entity` properties.
//! Invariants: Views never cache or mutate; every accessor reads the wrapped entity.
#![allow(clippy::result_large_err)]

use super::{ApiResult, Entity, Service};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Quota {
    Max,
    Bytes(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LicensePool(Entity);

impl LicensePool {
    pub const PATH: &'static str = "licenser/pools";

    pub fn new(entity: Entity) -> Self {
        Self(entity)
    }

    pub fn entity(&self) -> &Entity {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn description(&self) -> ApiResult<Option<String>> {
        self.0.get_str("description")
    }

    pub fn quota(&self) -> ApiResult<Option<Quota>> {
        match self.0.get_str("quota")? {
            None => Ok(None),
            Some(text) if text.eq_ignore_ascii_case("MAX") => Ok(Some(Quota::Max)),
            Some(_) => Ok(self.0.get_int("quota")?.map(Quota::Bytes)),
        }
    }

    pub fn used_bytes(&self) -> ApiResult<Option<i64>> {
        self.0.get_int("used_bytes")
    }

    pub fn stack_id(&self) -> ApiResult<Option<String>> {
        self.0.get_str("stack_id")
    }

    /// Indexers (by GUID) allowed to draw from this pool; `*` means all.
    pub fn slaves(&self) -> ApiResult<Vec<String>> {
        Ok(self.0.get_str_list("slaves")?.unwrap_or_default())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClusterPeer(Entity);

impl ClusterPeer {
    pub const PATH: &'static str = "cluster/master/peers";

    pub fn new(entity: Entity) -> Self {
        Self(entity)
    }

    pub fn entity(&self) -> &Entity {
        &self.0
    }

    pub fn label(&self) -> ApiResult<Option<String>> {
        self.0.get_str("label")
    }

    pub fn site(&self) -> ApiResult<Option<String>> {
        self.0.get_str("site")
    }

    pub fn status(&self) -> ApiResult<Option<String>> {
        self.0.get_str("status")
    }

    pub fn is_searchable(&self) -> ApiResult<bool> {
        Ok(self.0.get_bool("is_searchable")?.unwrap_or(false))
    }

    pub fn bucket_count(&self) -> ApiResult<Option<i64>> {
        self.0.get_int("bucket_count")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlertGroup(Entity);

impl AlertGroup {
    pub const PATH: &'static str = "alerts/fired_alerts";

    pub fn new(entity: Entity) -> Self {
        Self(entity)
    }

    pub fn entity(&self) -> &Entity {
        &self.0
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn triggered_alert_count(&self) -> ApiResult<i64> {
        Ok(self.0.get_int("triggered_alert_count")?.unwrap_or(0))
    }

    /// Individual fired alerts belonging to this group.
    pub fn triggered_alerts(&self, service: &Service) -> ApiResult<Vec<Entity>> {
        service.entities(&format!("{}/{}", Self::PATH, self.0.name()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppSetup(Entity);

impl AppSetup {
    pub fn path(app: &str) -> String {
        format!("apps/local/{app}/setup")
    }

    pub fn new(entity: Entity) -> Self {
        Self(entity)
    }

    pub fn entity(&self) -> &Entity {
        &self.0
    }

    pub fn setup_xml(&self) -> ApiResult<Option<String>> {
        self.0.get_str("eai:setup")
    }

    pub fn is_configured(&self) -> ApiResult<bool> {
        Ok(self.0.get_bool("configured")?.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::{AlertGroup, AppSetup, ClusterPeer, LicensePool, Quota};
    use crate::api::{Entity, ErrorKind};
    use serde_json::{Value, json};

    fn entity(name: &str, content: Value) -> Entity {
        let Value::Object(map) = content else {
            panic!("object content");
        };
        Entity::new(name, "test", map)
    }

    #[test]
    fn license_pool_quota_handles_max_and_bytes() {
        let max = LicensePool::new(entity("a", json!({"quota": "MAX", "slaves": ["*"]})));
        assert_eq!(max.quota().expect("quota"), Some(Quota::Max));
        assert_eq!(max.slaves().expect("slaves"), vec!["*".to_string()]);

        let sized = LicensePool::new(entity("b", json!({"quota": "1048576", "used_bytes": 10})));
        assert_eq!(sized.quota().expect("quota"), Some(Quota::Bytes(1_048_576)));
        assert_eq!(sized.used_bytes().expect("used"), Some(10));
        assert!(sized.slaves().expect("slaves").is_empty());
    }

    #[test]
    fn cluster_peer_flags_default_to_false() {
        let peer = ClusterPeer::new(entity("peer", json!({"label": "idx1", "bucket_count": "12"})));
        assert_eq!(peer.label().expect("label").as_deref(), Some("idx1"));
        assert!(!peer.is_searchable().expect("searchable"));
        assert_eq!(peer.bucket_count().expect("buckets"), Some(12));
    }

    #[test]
    fn alert_group_count_defaults_to_zero() {
        let group = AlertGroup::new(entity("errors", json!({})));
        assert_eq!(group.triggered_alert_count().expect("count"), 0);
        assert_eq!(group.name(), "errors");
    }

    #[test]
    fn app_setup_reads_form_and_configured_flag() {
        assert_eq!(AppSetup::path("search"), "apps/local/search/setup");

        let setup = AppSetup::new(entity(
            "setup",
            json!({"eai:setup": "<setup><block title=\"Inputs\"/></setup>", "configured": "1"}),
        ));
        assert_eq!(
            setup.setup_xml().expect("xml").as_deref(),
            Some("<setup><block title=\"Inputs\"/></setup>")
        );
        assert!(setup.is_configured().expect("configured"));
        assert_eq!(setup.entity().name(), "setup");

        let bare = AppSetup::new(entity("setup", json!({})));
        assert_eq!(bare.setup_xml().expect("xml"), None);
        assert!(!bare.is_configured().expect("configured"));

        let garbled = AppSetup::new(entity("setup", json!({"configured": "maybe"})));
        let err = garbled.is_configured().expect_err("not a flag");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
