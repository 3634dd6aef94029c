//! Built-in base set: the minimal self-hosting toolchain and userland.

use anyhow::Result;

use super::{BuildStrategy, PackageRecipe, PackageSpec};
use crate::config::BootstrapConfig;

struct BaseEntry {
    name: &'static str,
    version: &'static str,
    source_url: &'static str,
    license: &'static str,
    strategy: BuildStrategy,
    build_options: &'static [&'static str],
    depends_on: &'static [&'static str],
}

const BASE_SET: &[BaseEntry] = &[
    BaseEntry {
        name: "linux-headers",
        version: "6.6.8",
        source_url: "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-{version}.tar.xz",
        license: "GPL-2.0-only",
        strategy: BuildStrategy::KernelHeaders,
        build_options: &[],
        depends_on: &[],
    },
    BaseEntry {
        name: "glibc",
        version: "2.38",
        source_url: "https://ftpmirror.gnu.org/gnu/glibc/glibc-{version}.tar.xz",
        license: "LGPL-2.1-or-later",
        strategy: BuildStrategy::Autotools,
        build_options: &[
            "--disable-werror",
            "--enable-kernel=4.19",
            "--with-headers=/usr/include",
            "libc_cv_slibdir=/usr/lib",
        ],
        depends_on: &["linux-headers"],
    },
    BaseEntry {
        name: "binutils",
        version: "2.41",
        source_url: "https://ftpmirror.gnu.org/gnu/binutils/binutils-{version}.tar.xz",
        license: "GPL-3.0-or-later",
        strategy: BuildStrategy::Autotools,
        build_options: &[
            "--disable-nls",
            "--disable-werror",
            "--enable-gprofng=no",
            "--enable-64-bit-bfd",
        ],
        depends_on: &["glibc"],
    },
    BaseEntry {
        name: "gcc",
        version: "13.2.0",
        source_url: "https://ftpmirror.gnu.org/gnu/gcc/gcc-{version}/gcc-{version}.tar.xz",
        license: "GPL-3.0-or-later WITH GCC-exception-3.1",
        strategy: BuildStrategy::Autotools,
        build_options: &[
            "--enable-languages=c,c++",
            "--disable-multilib",
            "--disable-bootstrap",
            "--disable-libsanitizer",
            "--with-system-zlib=no",
        ],
        depends_on: &["glibc", "binutils"],
    },
    BaseEntry {
        name: "zlib",
        version: "1.3.1",
        source_url: "https://zlib.net/fossils/zlib-{version}.tar.gz",
        license: "Zlib",
        strategy: BuildStrategy::PrefixConfigure,
        build_options: &[],
        depends_on: &["glibc"],
    },
    BaseEntry {
        name: "coreutils",
        version: "9.4",
        source_url: "https://ftpmirror.gnu.org/gnu/coreutils/coreutils-{version}.tar.xz",
        license: "GPL-3.0-or-later",
        strategy: BuildStrategy::Autotools,
        build_options: &["--enable-no-install-program=kill,uptime"],
        depends_on: &["glibc"],
    },
    BaseEntry {
        name: "bash",
        version: "5.2.21",
        source_url: "https://ftpmirror.gnu.org/gnu/bash/bash-{version}.tar.gz",
        license: "GPL-3.0-or-later",
        strategy: BuildStrategy::Autotools,
        build_options: &["--without-bash-malloc"],
        depends_on: &["glibc"],
    },
    BaseEntry {
        name: "util-linux",
        version: "2.39.3",
        source_url: "https://www.kernel.org/pub/linux/utils/util-linux/v2.39/util-linux-{version}.tar.xz",
        license: "GPL-2.0-or-later",
        strategy: BuildStrategy::Autotools,
        build_options: &[
            "--disable-chfn-chsh",
            "--disable-login",
            "--disable-su",
            "--disable-setpriv",
            "--disable-runuser",
            "--disable-pylibmount",
            "--without-python",
            "--without-systemd",
        ],
        depends_on: &["glibc", "zlib"],
    },
];

/// The base set bound to the run configuration, in build order.
pub fn base_packages(config: &BootstrapConfig) -> Result<Vec<PackageSpec>> {
    BASE_SET
        .iter()
        .map(|entry| {
            PackageRecipe {
                name: entry.name.to_string(),
                version: entry.version.to_string(),
                source_url: entry.source_url.to_string(),
                license: entry.license.to_string(),
                strategy: entry.strategy,
                build_options: entry.build_options.iter().map(|s| s.to_string()).collect(),
                depends_on: entry.depends_on.iter().map(|s| s.to_string()).collect(),
            }
            .into_spec(config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn base_set_is_already_in_dependency_order() {
        let config = BootstrapConfig::with_root(Path::new("/tmp/seiryo"));
        let specs = base_packages(&config).unwrap();
        assert_eq!(specs.len(), 8);

        for (idx, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let dep_idx = specs
                    .iter()
                    .position(|s| &s.name == dep)
                    .unwrap_or_else(|| panic!("{} depends on unknown {dep}", spec.name));
                assert!(dep_idx < idx, "{} listed before its dependency {dep}", spec.name);
            }
        }
    }

    #[test]
    fn exactly_two_packages_use_custom_strategies() {
        let config = BootstrapConfig::with_root(Path::new("/tmp/seiryo"));
        let custom: Vec<_> = base_packages(&config)
            .unwrap()
            .into_iter()
            .filter(|s| s.strategy != BuildStrategy::Autotools)
            .map(|s| s.name)
            .collect();
        assert_eq!(custom, vec!["linux-headers".to_string(), "zlib".to_string()]);
    }

    #[test]
    fn urls_have_versions_substituted() {
        let config = BootstrapConfig::with_root(Path::new("/tmp/seiryo"));
        for spec in base_packages(&config).unwrap() {
            assert!(!spec.source_url.contains("{version}"), "{}", spec.source_url);
            assert!(spec.source_url.contains(&spec.version), "{}", spec.source_url);
        }
    }
}
