//! Android ABI identifiers for abipack.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A target CPU architecture the native library is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Abi {
    ArmeabiV7a,
    Arm64V8a,
    X86,
    X86_64,
    Riscv64,
}

impl Abi {
    /// Every ABI abipack knows how to build, in canonical order.
    pub const ALL: [Abi; 5] = [
        Abi::ArmeabiV7a,
        Abi::Arm64V8a,
        Abi::X86,
        Abi::X86_64,
        Abi::Riscv64,
    ];

    /// The NDK name of this ABI, as passed to `-DANDROID_ABI`.
    pub fn as_str(self) -> &'static str {
        match self {
            Abi::ArmeabiV7a => "armeabi-v7a",
            Abi::Arm64V8a => "arm64-v8a",
            Abi::X86 => "x86",
            Abi::X86_64 => "x86_64",
            Abi::Riscv64 => "riscv64",
        }
    }

    /// Directory name used for this ABI inside a Prefab module (`android.arm64-v8a`).
    pub fn prefab_dir_name(self) -> String {
        format!("android.{}", self.as_str())
    }

    /// Lowest Android API level the NDK supports for this ABI.
    ///
    /// `riscv64` only exists from API 35 onwards; everything else builds for any
    /// platform the NDK still supports.
    pub fn min_api_level(self) -> u32 {
        match self {
            Abi::Riscv64 => 35,
            Abi::Arm64V8a | Abi::X86_64 => 21,
            Abi::ArmeabiV7a | Abi::X86 => 19,
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Abi {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Abi::ALL
            .into_iter()
            .find(|abi| abi.as_str() == s)
            .ok_or_else(|| TargetError::UnknownAbi {
                name: s.to_owned(),
                known: Abi::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", "),
            })
    }
}

impl TryFrom<String> for Abi {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Abi> for String {
    fn from(abi: Abi) -> Self {
        abi.as_str().to_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("unknown ABI `{name}` — expected one of: {known}")]
    UnknownAbi { name: String, known: String },
}
