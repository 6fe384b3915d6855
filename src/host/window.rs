/*!
 * Window Manager
 * Best-effort visual collaborator. Failures are logged and ignored.
 */

use crate::core::id::Token;
use crate::core::types::ElementName;

pub trait WindowManager: Send + Sync {
    fn show_starting_window(&self, token: Token, element: &ElementName) -> anyhow::Result<()>;

    fn animate_transition(&self, from: Option<Token>, to: Token) -> anyhow::Result<()>;

    fn snapshot(&self, token: Token) -> Option<Vec<u8>>;
}

/// Window manager for headless deployments
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWindowManager;

impl WindowManager for NoopWindowManager {
    fn show_starting_window(&self, _token: Token, _element: &ElementName) -> anyhow::Result<()> {
        Ok(())
    }

    fn animate_transition(&self, _from: Option<Token>, _to: Token) -> anyhow::Result<()> {
        Ok(())
    }

    fn snapshot(&self, _token: Token) -> Option<Vec<u8>> {
        None
    }
}
