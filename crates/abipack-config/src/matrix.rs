//! The validated variant/ABI build matrix.
//!
//! Variants form a forest through `base_on`. The matrix is validated once at load
//! time (unique names, resolvable parents, no cycles, ABI restrictions inside the
//! declared set) so every later lookup is infallible for declared names.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use abipack_targets::Abi;
use serde::{Deserialize, Serialize};

/// How the C++ runtime is linked into the produced library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeLink {
    /// Link against the shared C++ runtime (`c++_shared`).
    Shared,
    /// No C++ runtime; the library must be self-contained.
    None,
}

impl fmt::Display for RuntimeLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeLink::Shared => f.write_str("shared"),
            RuntimeLink::None => f.write_str("none"),
        }
    }
}

/// A named build configuration, as declared in `[[variant]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Parent variant whose flags precede this variant's own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_on: Option<String>,
    /// Explicit runtime-link mode. Inherited from the parent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_link: Option<RuntimeLink>,
    /// CMake build type. Inherited from the parent when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    /// Preprocessor defines, rendered as `-D<define>` in sorted order.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub defines: BTreeSet<String>,
    /// Additional flags appended after the defines, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Restrict this variant to a subset of the declared ABIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abis: Option<Vec<Abi>>,
}

impl Variant {
    /// A root variant with no overrides.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            base_on: None,
            runtime_link: None,
            build_type: None,
            defines: BTreeSet::new(),
            flags: Vec::new(),
            abis: None,
        }
    }
}

/// Build type used when no variant in a lineage declares one.
pub const DEFAULT_BUILD_TYPE: &str = "Release";

/// The validated set of variants and the ABIs they are built for.
#[derive(Debug, Clone)]
pub struct VariantMatrix {
    abis: Vec<Abi>,
    variants: Vec<Variant>,
    index: HashMap<String, usize>,
}

impl VariantMatrix {
    /// Validate `variants` against the declared `abis`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the ABI list is empty or has duplicates, no
    /// variants are declared, a name is duplicated or not path-safe, a `base_on`
    /// is undeclared, inheritance is cyclic, or an ABI restriction is empty or
    /// names an undeclared ABI.
    pub fn new(abis: Vec<Abi>, variants: Vec<Variant>) -> Result<Self, ConfigError> {
        if abis.is_empty() {
            return Err(ConfigError::NoAbis);
        }
        let mut seen_abis = BTreeSet::new();
        for abi in &abis {
            if !seen_abis.insert(*abi) {
                return Err(ConfigError::DuplicateAbi { abi: *abi });
            }
        }

        if variants.is_empty() {
            return Err(ConfigError::NoVariants);
        }

        let mut index = HashMap::new();
        for (i, variant) in variants.iter().enumerate() {
            validate_name("variant", &variant.name)?;
            if index.insert(variant.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateVariant {
                    name: variant.name.clone(),
                });
            }
        }

        for variant in &variants {
            if let Some(base) = &variant.base_on {
                if !index.contains_key(base) {
                    return Err(ConfigError::UnknownBaseVariant {
                        variant: variant.name.clone(),
                        base: base.clone(),
                    });
                }
            }
            if let Some(restricted) = &variant.abis {
                if restricted.is_empty() {
                    return Err(ConfigError::EmptyAbiRestriction {
                        variant: variant.name.clone(),
                    });
                }
                if let Some(abi) = restricted.iter().find(|a| !abis.contains(a)) {
                    return Err(ConfigError::UndeclaredAbi {
                        variant: variant.name.clone(),
                        abi: *abi,
                    });
                }
            }
        }

        let matrix = Self {
            abis,
            variants,
            index,
        };
        matrix.check_acyclic()?;
        Ok(matrix)
    }

    /// DFS with three-color marking (white→gray→black) over `base_on` edges.
    fn check_acyclic(&self) -> Result<(), ConfigError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; self.variants.len()];

        for start in 0..self.variants.len() {
            let mut stack: Vec<usize> = Vec::new();
            let mut current = Some(start);

            while let Some(i) = current {
                match color.get(i).copied() {
                    Some(Color::Black) | None => break,
                    Some(Color::Gray) => {
                        let cycle_start = stack.iter().position(|&s| s == i).unwrap_or(0);
                        let mut names: Vec<&str> = stack
                            .get(cycle_start..)
                            .unwrap_or(stack.as_slice())
                            .iter()
                            .filter_map(|&s| self.variants.get(s).map(|v| v.name.as_str()))
                            .collect();
                        if let Some(v) = self.variants.get(i) {
                            names.push(&v.name);
                        }
                        return Err(ConfigError::VariantCycle {
                            cycle: names.join(" -> "),
                        });
                    }
                    Some(Color::White) => {
                        if let Some(c) = color.get_mut(i) {
                            *c = Color::Gray;
                        }
                        stack.push(i);
                        current = self
                            .variants
                            .get(i)
                            .and_then(|v| v.base_on.as_ref())
                            .and_then(|base| self.index.get(base).copied());
                    }
                }
            }

            for i in stack {
                if let Some(c) = color.get_mut(i) {
                    *c = Color::Black;
                }
            }
        }

        Ok(())
    }

    /// The declared ABI set, in declaration order.
    pub fn abis(&self) -> &[Abi] {
        &self.abis
    }

    /// All variants, in declaration order.
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Look up a variant by name.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `name` is not declared.
    pub fn get(&self, name: &str) -> Result<&Variant, ConfigError> {
        self.index
            .get(name)
            .and_then(|&i| self.variants.get(i))
            .ok_or_else(|| ConfigError::UnknownVariant {
                name: name.to_owned(),
                available: self
                    .variants
                    .iter()
                    .map(|v| v.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// The inheritance chain of `name`, root first, `name` last.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `name` is not declared.
    pub fn lineage(&self, name: &str) -> Result<Vec<&Variant>, ConfigError> {
        let mut chain = vec![self.get(name)?];
        while let Some(base) = chain.last().and_then(|v| v.base_on.as_deref()) {
            chain.push(self.get(base)?);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Runtime-link mode in effect for `name`: nearest explicit declaration, else shared.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `name` is not declared.
    pub fn runtime_link(&self, name: &str) -> Result<RuntimeLink, ConfigError> {
        Ok(self
            .lineage(name)?
            .iter()
            .rev()
            .find_map(|v| v.runtime_link)
            .unwrap_or(RuntimeLink::Shared))
    }

    /// CMake build type in effect for `name`: nearest explicit declaration, else `Release`.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `name` is not declared.
    pub fn build_type(&self, name: &str) -> Result<String, ConfigError> {
        Ok(self
            .lineage(name)?
            .iter()
            .rev()
            .find_map(|v| v.build_type.clone())
            .unwrap_or_else(|| DEFAULT_BUILD_TYPE.to_owned()))
    }

    /// ABIs `name` is built for: nearest restriction in its lineage, else the full set.
    ///
    /// The result keeps the declared ABI order.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `name` is not declared.
    pub fn abis_for(&self, name: &str) -> Result<Vec<Abi>, ConfigError> {
        let restriction = self
            .lineage(name)?
            .iter()
            .rev()
            .find_map(|v| v.abis.clone());
        Ok(match restriction {
            Some(restricted) => self
                .abis
                .iter()
                .filter(|a| restricted.contains(a))
                .copied()
                .collect(),
            None => self.abis.clone(),
        })
    }

    /// Every (variant, ABI) pair of the matrix, variants in declaration order.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if a selected name is not declared.
    pub fn pairs(&self, selected: Option<&[String]>) -> Result<Vec<(String, Abi)>, ConfigError> {
        let names: Vec<&str> = match selected {
            Some(names) => {
                for name in names {
                    self.get(name)?;
                }
                self.variants
                    .iter()
                    .map(|v| v.name.as_str())
                    .filter(|n| names.iter().any(|s| s == n))
                    .collect()
            }
            None => self.variants.iter().map(|v| v.name.as_str()).collect(),
        };

        let mut pairs = Vec::new();
        for name in names {
            for abi in self.abis_for(name)? {
                pairs.push((name.to_owned(), abi));
            }
        }
        Ok(pairs)
    }
}

/// Check that a name is usable as a single path component.
///
/// # Errors
/// Returns `ConfigError::InvalidName` for empty names or names containing
/// anything outside `[A-Za-z0-9_-]`.
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::InvalidName {
            kind,
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// A malformed build matrix or manifest. Always fatal, before any toolchain runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no ABIs declared — add `abis = [...]` to abipack.toml")]
    NoAbis,

    #[error("ABI `{abi}` is declared more than once")]
    DuplicateAbi { abi: Abi },

    #[error("no variants declared — add at least one [[variant]] table")]
    NoVariants,

    #[error("invalid {kind} name `{name}` — only letters, digits, `-` and `_` are allowed")]
    InvalidName { kind: &'static str, name: String },

    #[error("variant `{name}` is declared more than once")]
    DuplicateVariant { name: String },

    #[error("unknown variant `{name}` — available variants: {available}")]
    UnknownVariant { name: String, available: String },

    #[error("variant `{variant}` is based on undeclared variant `{base}`")]
    UnknownBaseVariant { variant: String, base: String },

    #[error("variant inheritance cycle: {cycle}")]
    VariantCycle { cycle: String },

    #[error("variant `{variant}` restricts its ABIs to an empty set")]
    EmptyAbiRestriction { variant: String },

    #[error("variant `{variant}` restricts to ABI `{abi}` which is not in the declared ABI set")]
    UndeclaredAbi { variant: String, abi: Abi },

    #[error("artifact `{id}` is declared more than once")]
    DuplicateArtifact { id: String },

    #[error("artifact `{id}` refers to undeclared variant `{variant}`")]
    UnknownArtifactVariant { id: String, variant: String },

    #[error("module `{name}` is declared more than once")]
    DuplicateModule { name: String },

    #[error("module `{name}` headers `{header_dir}` must be a relative path inside the source root")]
    HeaderDirOutsideRoot { name: String, header_dir: String },

    #[error("no [publish] section — set `group` and metadata before publishing")]
    MissingPublishSection,

    #[error("unknown artifact `{id}` — available artifacts: {available}")]
    UnknownArtifact { id: String, available: String },

    #[error("no repository configured — set `repository` in [publish] or use --dry-run")]
    MissingRepository,

    #[error("ABI `{abi}` is not in the declared ABI set")]
    AbiNotDeclared { abi: Abi },
}
