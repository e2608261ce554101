// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// API result code. Numeric values follow the Level Zero result taxonomy.
/// Value 0 = success, values below 0x7000_0000 are statuses.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const NOT_READY: Self = Self(1);

    pub const DEVICE_LOST: Self = Self(0x7000_0001);
    pub const OUT_OF_HOST_MEMORY: Self = Self(0x7000_0002);
    pub const OUT_OF_DEVICE_MEMORY: Self = Self(0x7000_0003);

    pub const UNINITIALIZED: Self = Self(0x7800_0001);
    pub const UNSUPPORTED_FEATURE: Self = Self(0x7800_0003);
    pub const INVALID_ARGUMENT: Self = Self(0x7800_0004);
    pub const INVALID_NULL_HANDLE: Self = Self(0x7800_0005);
    pub const HANDLE_OBJECT_IN_USE: Self = Self(0x7800_0006);
    pub const INVALID_SIZE: Self = Self(0x7800_0008);
    pub const INVALID_GROUP_SIZE_DIMENSION: Self = Self(0x7800_0013);
    pub const INVALID_KERNEL_ARGUMENT_INDEX: Self = Self(0x7800_0015);
    pub const INVALID_KERNEL_ARGUMENT_SIZE: Self = Self(0x7800_0016);
    pub const INVALID_COMMAND_LIST_TYPE: Self = Self(0x7800_0019);

    pub const UNKNOWN: Self = Self(0x7FFF_FFFF);

    /// Check if this is a success result.
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Check if this is an error result. `NOT_READY` is a status, not an error.
    #[inline]
    pub const fn is_error(self) -> bool {
        self.0 >= 0x7000_0000
    }

    /// Raw u32 value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "SUCCESS",
            Self::NOT_READY => "NOT_READY",
            Self::DEVICE_LOST => "ERROR_DEVICE_LOST",
            Self::OUT_OF_HOST_MEMORY => "ERROR_OUT_OF_HOST_MEMORY",
            Self::OUT_OF_DEVICE_MEMORY => "ERROR_OUT_OF_DEVICE_MEMORY",
            Self::UNINITIALIZED => "ERROR_UNINITIALIZED",
            Self::UNSUPPORTED_FEATURE => "ERROR_UNSUPPORTED_FEATURE",
            Self::INVALID_ARGUMENT => "ERROR_INVALID_ARGUMENT",
            Self::INVALID_NULL_HANDLE => "ERROR_INVALID_NULL_HANDLE",
            Self::HANDLE_OBJECT_IN_USE => "ERROR_HANDLE_OBJECT_IN_USE",
            Self::INVALID_SIZE => "ERROR_INVALID_SIZE",
            Self::INVALID_GROUP_SIZE_DIMENSION => "ERROR_INVALID_GROUP_SIZE_DIMENSION",
            Self::INVALID_KERNEL_ARGUMENT_INDEX => "ERROR_INVALID_KERNEL_ARGUMENT_INDEX",
            Self::INVALID_KERNEL_ARGUMENT_SIZE => "ERROR_INVALID_KERNEL_ARGUMENT_SIZE",
            Self::INVALID_COMMAND_LIST_TYPE => "ERROR_INVALID_COMMAND_LIST_TYPE",
            Self::UNKNOWN => "ERROR_UNKNOWN",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "ResultCode::{}", name),
            None => write!(f, "ResultCode(raw=0x{:08X})", self.0),
        }
    }
}

impl std::error::Error for ResultCode {}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

// ── Driver errors ──────────────────────────────────────────────────────────

/// Errors returned by driver API operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("required handle is null: {0}")]
    InvalidNullHandle(&'static str),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid group size {x}x{y}x{z} (max {max})")]
    InvalidGroupSize { x: u32, y: u32, z: u32, max: u32 },

    #[error("invalid kernel argument index {0}")]
    InvalidKernelArgumentIndex(u32),

    #[error("invalid size {actual} for kernel argument {index} (expected {expected})")]
    InvalidKernelArgumentSize {
        index: u32,
        expected: usize,
        actual: usize,
    },

    #[error("command list type mismatch: list copy_only={list_copy_only}, queue copy_only={queue_copy_only}")]
    WrongCommandListType {
        list_copy_only: bool,
        queue_copy_only: bool,
    },

    #[error("object still in use: {0}")]
    ObjectInUse(&'static str),

    #[error("out of device memory (requested 0x{requested:X} bytes)")]
    OutOfDeviceMemory { requested: u64 },

    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("driver not initialized: {0}")]
    Uninitialized(&'static str),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
}

impl DriverError {
    /// Map the error into the API result-code taxonomy.
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::InvalidArgument(_) => ResultCode::INVALID_ARGUMENT,
            Self::InvalidNullHandle(_) => ResultCode::INVALID_NULL_HANDLE,
            Self::InvalidSize(_) => ResultCode::INVALID_SIZE,
            Self::InvalidGroupSize { .. } => ResultCode::INVALID_GROUP_SIZE_DIMENSION,
            Self::InvalidKernelArgumentIndex(_) => ResultCode::INVALID_KERNEL_ARGUMENT_INDEX,
            Self::InvalidKernelArgumentSize { .. } => ResultCode::INVALID_KERNEL_ARGUMENT_SIZE,
            Self::WrongCommandListType { .. } => ResultCode::INVALID_COMMAND_LIST_TYPE,
            Self::ObjectInUse(_) => ResultCode::HANDLE_OBJECT_IN_USE,
            Self::OutOfDeviceMemory { .. } => ResultCode::OUT_OF_DEVICE_MEMORY,
            Self::OutOfHostMemory => ResultCode::OUT_OF_HOST_MEMORY,
            Self::DeviceLost(_) => ResultCode::DEVICE_LOST,
            Self::Uninitialized(_) => ResultCode::UNINITIALIZED,
            Self::UnsupportedFeature(_) => ResultCode::UNSUPPORTED_FEATURE,
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl From<DriverError> for ResultCode {
    fn from(err: DriverError) -> Self {
        err.result_code()
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Outcome of a non-failing completion query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Ready,
    NotReady,
}

impl SyncStatus {
    pub fn result_code(self) -> ResultCode {
        match self {
            Self::Ready => ResultCode::SUCCESS,
            Self::NotReady => ResultCode::NOT_READY,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_codes() {
        assert_eq!(SyncStatus::Ready.result_code(), ResultCode::SUCCESS);
        assert_eq!(SyncStatus::NotReady.result_code(), ResultCode::NOT_READY);
        assert!(!SyncStatus::NotReady.is_ready());
    }

    #[test]
    fn test_result_code_classes() {
        assert!(ResultCode::SUCCESS.is_success());
        assert!(!ResultCode::SUCCESS.is_error());
        assert!(!ResultCode::NOT_READY.is_error());
        assert!(!ResultCode::NOT_READY.is_success());
        assert!(ResultCode::DEVICE_LOST.is_error());
        assert!(ResultCode::INVALID_COMMAND_LIST_TYPE.is_error());
    }

    #[test]
    fn test_result_code_display() {
        assert_eq!(
            ResultCode::INVALID_COMMAND_LIST_TYPE.to_string(),
            "ERROR_INVALID_COMMAND_LIST_TYPE"
        );
        assert_eq!(ResultCode(0x7800_0042).to_string(), "0x78000042");
        assert_eq!(format!("{:?}", ResultCode::NOT_READY), "ResultCode::NOT_READY");
    }

    #[test]
    fn test_driver_error_mapping() {
        let err = DriverError::WrongCommandListType {
            list_copy_only: true,
            queue_copy_only: false,
        };
        assert_eq!(err.result_code(), ResultCode::INVALID_COMMAND_LIST_TYPE);
        assert_eq!(
            DriverError::invalid_argument("ordinal").result_code(),
            ResultCode::INVALID_ARGUMENT
        );
        assert_eq!(
            ResultCode::from(DriverError::OutOfDeviceMemory { requested: 4096 }),
            ResultCode::OUT_OF_DEVICE_MEMORY
        );
        assert_eq!(
            DriverError::DeviceLost("hang".into()).result_code(),
            ResultCode::DEVICE_LOST
        );
    }
}
