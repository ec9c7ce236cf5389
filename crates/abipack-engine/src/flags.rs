//! Flag composition: base flags, then each ancestor's overrides, then the variant's own.
//!
//! Overrides only ever append. A variant can re-assert a flag its parent already
//! set, but nothing is ever removed from an inherited flag set.

use abipack_config::manifest::FlagsConfig;
use abipack_config::{ConfigError, RuntimeLink, Variant, VariantMatrix};

/// Composes the final flag set for each variant of a matrix.
#[derive(Debug, Clone, Copy)]
pub struct FlagComposer<'a> {
    matrix: &'a VariantMatrix,
    flags: &'a FlagsConfig,
}

impl<'a> FlagComposer<'a> {
    pub fn new(matrix: &'a VariantMatrix, flags: &'a FlagsConfig) -> Self {
        Self { matrix, flags }
    }

    /// The composed flag set for `variant`.
    ///
    /// Starts from the base flags, then appends each variant's own flags from the
    /// root of its lineage down to `variant` itself, so a parent's composed flags
    /// are always a prefix of its child's.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownVariant` if `variant` is not declared.
    pub fn compose(&self, variant: &str) -> Result<Vec<String>, ConfigError> {
        let mut composed = self.flags.base.clone();
        for v in self.matrix.lineage(variant)? {
            composed.extend(self.own_flags(v));
        }
        tracing::debug!("composed flags for {variant}: {}", composed.join(" "));
        Ok(composed)
    }

    /// The flags a single variant contributes, in fixed order: the runtime-link flag
    /// (only when declared explicitly), `-D<define>` in sorted order, then its own flags.
    pub fn own_flags(&self, variant: &Variant) -> Vec<String> {
        let mut own = Vec::new();
        if let Some(link) = variant.runtime_link {
            own.push(self.runtime_flag(link).to_owned());
        }
        own.extend(variant.defines.iter().map(|d| format!("-D{d}")));
        own.extend(variant.flags.iter().cloned());
        own
    }

    /// The flag a runtime-link mode maps to.
    pub fn runtime_flag(&self, link: RuntimeLink) -> &str {
        match link {
            RuntimeLink::Shared => &self.flags.runtime_shared,
            RuntimeLink::None => &self.flags.runtime_none,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use abipack_targets::Abi;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    fn flags_config(base: &[&str]) -> FlagsConfig {
        FlagsConfig {
            base: strings(base),
            ..FlagsConfig::default()
        }
    }

    #[test]
    fn standalone_on_release_appends_its_own_flag() {
        let mut release = Variant::named("release");
        release.flags = strings(&["-O2"]);
        let mut standalone = Variant::named("standalone");
        standalone.base_on = Some("release".to_owned());
        standalone.flags = strings(&["-DSTANDALONE"]);
        let matrix = VariantMatrix::new(vec![Abi::Arm64V8a], vec![release, standalone]).unwrap();
        let config = flags_config(&[]);
        let composer = FlagComposer::new(&matrix, &config);

        assert_eq!(composer.compose("release").unwrap(), strings(&["-O2"]));
        assert_eq!(
            composer.compose("standalone").unwrap(),
            strings(&["-O2", "-DSTANDALONE"])
        );
    }

    #[test]
    fn lsplant_variants_compose_in_fixed_order() {
        let mut release = Variant::named("release");
        release.runtime_link = Some(RuntimeLink::Shared);
        let mut standalone = Variant::named("standalone");
        standalone.base_on = Some("release".to_owned());
        standalone.runtime_link = Some(RuntimeLink::None);
        standalone.defines.insert("LSPLANT_STANDALONE=ON".to_owned());
        standalone.defines.insert("A_FIRST".to_owned());
        standalone.flags = strings(&["-fno-exceptions"]);
        let matrix = VariantMatrix::new(vec![Abi::X86], vec![release, standalone]).unwrap();
        let config = flags_config(&["-Werror", "-Wno-c++2b-extensions"]);
        let composer = FlagComposer::new(&matrix, &config);

        assert_eq!(
            composer.compose("standalone").unwrap(),
            strings(&[
                "-Werror",
                "-Wno-c++2b-extensions",
                "-DANDROID_STL=c++_shared",
                "-DANDROID_STL=none",
                "-DA_FIRST",
                "-DLSPLANT_STANDALONE=ON",
                "-fno-exceptions",
            ])
        );
    }

    #[test]
    fn inherited_runtime_link_adds_no_flag() {
        let mut release = Variant::named("release");
        release.runtime_link = Some(RuntimeLink::Shared);
        let mut child = Variant::named("profile");
        child.base_on = Some("release".to_owned());
        let matrix = VariantMatrix::new(vec![Abi::X86], vec![release, child]).unwrap();
        let config = flags_config(&[]);
        let composer = FlagComposer::new(&matrix, &config);

        assert_eq!(
            composer.compose("profile").unwrap(),
            composer.compose("release").unwrap()
        );
    }

    #[test]
    fn unknown_variant_is_config_error() {
        let matrix = VariantMatrix::new(vec![Abi::X86], vec![Variant::named("release")]).unwrap();
        let config = flags_config(&[]);
        let err = FlagComposer::new(&matrix, &config)
            .compose("nightly")
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVariant { .. }));
    }

    #[test]
    fn compose_is_deterministic() {
        let mut v = Variant::named("release");
        for d in ["Z", "M", "A"] {
            v.defines.insert(d.to_owned());
        }
        let matrix = VariantMatrix::new(vec![Abi::X86], vec![v]).unwrap();
        let config = flags_config(&["-g"]);
        let composer = FlagComposer::new(&matrix, &config);
        let first = composer.compose("release").unwrap();
        assert_eq!(first, composer.compose("release").unwrap());
        assert_eq!(first, strings(&["-g", "-DA", "-DM", "-DZ"]));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn flag() -> impl Strategy<Value = String> {
            "-[A-Za-z][A-Za-z0-9=_+-]{0,8}"
        }

        fn overrides() -> impl Strategy<Value = (Option<bool>, Vec<String>, Vec<String>)> {
            (
                proptest::option::of(any::<bool>()),
                proptest::collection::vec("[A-Z][A-Z0-9_]{0,6}", 0..4),
                proptest::collection::vec(flag(), 0..4),
            )
        }

        fn variant_from(name: &str, base: Option<&str>, o: &(Option<bool>, Vec<String>, Vec<String>)) -> Variant {
            let mut v = Variant::named(name);
            v.base_on = base.map(str::to_owned);
            v.runtime_link = o.0.map(|shared| if shared { RuntimeLink::Shared } else { RuntimeLink::None });
            v.defines = o.1.iter().cloned().collect();
            v.flags = o.2.clone();
            v
        }

        proptest! {
            #[test]
            fn root_variant_is_base_then_own(
                base in proptest::collection::vec(flag(), 0..5),
                own in overrides(),
            ) {
                let v = variant_from("root", None, &own);
                let matrix = VariantMatrix::new(vec![Abi::X86], vec![v.clone()]).unwrap();
                let config = FlagsConfig { base: base.clone(), ..FlagsConfig::default() };
                let composer = FlagComposer::new(&matrix, &config);

                let mut expected = base;
                expected.extend(composer.own_flags(&v));
                prop_assert_eq!(composer.compose("root").unwrap(), expected);
            }

            #[test]
            fn parent_flags_are_a_prefix_of_child_flags(
                base in proptest::collection::vec(flag(), 0..5),
                parent in overrides(),
                child in overrides(),
            ) {
                let p = variant_from("parent", None, &parent);
                let c = variant_from("child", Some("parent"), &child);
                let matrix = VariantMatrix::new(vec![Abi::X86], vec![p, c.clone()]).unwrap();
                let config = FlagsConfig { base, ..FlagsConfig::default() };
                let composer = FlagComposer::new(&matrix, &config);

                let parent_flags = composer.compose("parent").unwrap();
                let child_flags = composer.compose("child").unwrap();
                prop_assert!(child_flags.starts_with(&parent_flags));
                if !composer.own_flags(&c).is_empty() {
                    prop_assert!(child_flags.len() > parent_flags.len());
                }
            }
        }
    }
}
