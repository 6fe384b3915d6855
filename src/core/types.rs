/*!
 * Core Types
 * Component identity, start requests and metadata shared across the kernel
 */

use super::id::Token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Component Identity
// ============================================================================

/// Fully qualified component name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ElementName {
    pub device_id: String,
    pub bundle_name: String,
    pub module_name: String,
    pub ability_name: String,
}

impl ElementName {
    #[inline]
    #[must_use]
    pub fn new(bundle_name: impl Into<String>, ability_name: impl Into<String>) -> Self {
        Self {
            device_id: String::new(),
            bundle_name: bundle_name.into(),
            module_name: String::new(),
            ability_name: ability_name.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_module(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Canonical registry key
    #[must_use]
    pub fn uri(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.device_id, self.bundle_name, self.module_name, self.ability_name
        )
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundle_name.is_empty() || self.ability_name.is_empty()
    }
}

impl fmt::Display for ElementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Start intent: target element plus free-form parameters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Want {
    pub element: ElementName,
    pub params: BTreeMap<String, String>,
    pub flags: u32,
}

impl Want {
    #[inline]
    #[must_use]
    pub fn new(element: ElementName) -> Self {
        Self {
            element,
            params: BTreeMap::new(),
            flags: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

// ============================================================================
// Component Metadata
// ============================================================================

/// Component category. Decides which manager owns the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// UI screen, owned by the mission list manager
    Page,
    /// Background service, owned by the connect manager
    Service,
    /// Extension, owned by the connect manager
    Extension,
    /// Data provider, not routable through this kernel
    Data,
}

impl ComponentKind {
    /// Service and extension components are connectable
    #[inline(always)]
    #[must_use]
    pub const fn is_connectable(&self) -> bool {
        matches!(self, ComponentKind::Service | ComponentKind::Extension)
    }
}

/// How repeated starts of a page resolve to instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    #[default]
    Standard,
    Singleton,
    Specified,
}

/// Resolved component metadata from the bundle resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    pub bundle_name: String,
    pub module_name: String,
    pub device_id: String,
    pub kind: ComponentKind,
    pub launch_mode: LaunchMode,
    pub process: String,
    pub visible: bool,
    pub label: String,
}

impl ComponentInfo {
    #[must_use]
    pub fn new(bundle_name: impl Into<String>, name: impl Into<String>, kind: ComponentKind) -> Self {
        let bundle_name = bundle_name.into();
        Self {
            name: name.into(),
            process: bundle_name.clone(),
            bundle_name,
            module_name: String::new(),
            device_id: String::new(),
            kind,
            launch_mode: LaunchMode::Standard,
            visible: true,
            label: String::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_launch_mode(mut self, launch_mode: LaunchMode) -> Self {
        self.launch_mode = launch_mode;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_module(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    #[must_use]
    pub fn element(&self) -> ElementName {
        ElementName {
            device_id: self.device_id.clone(),
            bundle_name: self.bundle_name.clone(),
            module_name: self.module_name.clone(),
            ability_name: self.name.clone(),
        }
    }
}

/// Resolved application metadata from the bundle resolver
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub bundle_name: String,
    pub uid: i32,
    pub is_launcher_app: bool,
    pub keep_alive: bool,
}

impl ApplicationInfo {
    #[must_use]
    pub fn new(bundle_name: impl Into<String>, uid: i32) -> Self {
        let bundle_name = bundle_name.into();
        Self {
            name: bundle_name.clone(),
            bundle_name,
            uid,
            is_launcher_app: false,
            keep_alive: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn launcher(mut self) -> Self {
        self.is_launcher_app = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }
}

// ============================================================================
// Start Request
// ============================================================================

/// Resolved start request handed to a manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequest {
    pub want: Want,
    pub info: ComponentInfo,
    pub app: ApplicationInfo,
    pub request_code: i32,
    pub caller: Option<Token>,
    pub uid: i32,
    /// Set on requests re-submitted by the restart path
    pub restart: bool,
    pub restart_count: i32,
    pub restart_time: i64,
}

impl ComponentRequest {
    #[must_use]
    pub fn new(want: Want, info: ComponentInfo, app: ApplicationInfo) -> Self {
        let uid = app.uid;
        Self {
            want,
            info,
            app,
            request_code: -1,
            caller: None,
            uid,
            restart: false,
            restart_count: -1,
            restart_time: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_caller(mut self, caller: Token) -> Self {
        self.caller = Some(caller);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_request_code(mut self, request_code: i32) -> Self {
        self.request_code = request_code;
        self
    }

    #[inline]
    #[must_use]
    pub fn as_restart(mut self, restart_count: i32, restart_time: i64) -> Self {
        self.restart = true;
        self.restart_count = restart_count;
        self.restart_time = restart_time;
        self
    }

    /// Registry key of the target
    #[inline]
    #[must_use]
    pub fn uri(&self) -> String {
        self.info.element().uri()
    }
}

/// Remote object returned by a connected service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteObject(pub u64);
