/*!
 * Caller Records
 * Who started a component and the result owed to them
 */

use crate::core::id::Token;
use crate::core::types::Want;
use serde::{Deserialize, Serialize};

/// Result delivered to a caller when the started component finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub request_code: i32,
    pub result_code: i32,
    pub want: Want,
}

/// One start request awaiting a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerRecord {
    pub request_code: i32,
    pub caller: Option<Token>,
    pub result: Option<ComponentResult>,
}

impl CallerRecord {
    #[inline]
    #[must_use]
    pub fn new(request_code: i32, caller: Option<Token>) -> Self {
        Self {
            request_code,
            caller,
            result: None,
        }
    }

    pub fn save_result(&mut self, result_code: i32, want: Want) {
        self.result = Some(ComponentResult {
            request_code: self.request_code,
            result_code,
            want,
        });
    }
}
