/*!
 * Bundle Resolver
 * Component and application metadata lookup
 */

use crate::core::errors::AbilityResult;
use crate::core::id::UserId;
use crate::core::types::{ApplicationInfo, ComponentInfo, Want};
use serde::{Deserialize, Serialize};

/// Metadata resolved for a start intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub info: ComponentInfo,
    pub app: ApplicationInfo,
}

/// Package-manager collaborator
pub trait BundleResolver: Send + Sync {
    /// Resolve the element named by `want` for `user`
    fn resolve(&self, want: &Want, user: UserId) -> AbilityResult<ResolvedComponent>;
}
