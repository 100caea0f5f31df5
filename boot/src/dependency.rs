//! Inter-image dependency TLV resolution (spec §4.7 step 3).

use storage::area::{FlashArea, FlashMap};

use crate::error::Result;
use crate::image::{ImageHeader, ImageVersion};
use crate::tlv::{self, types};
use crate::trailer::SwapType;

/// One parsed `dependency` TLV: "this image requires image `index` to be
/// at least `min_version`".
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub image_index: u8,
    pub min_version: ImageVersion,
}

const DEP_ENTRY_LEN: usize = 12;

fn parse_dependency(buf: &[u8; DEP_ENTRY_LEN]) -> Dependency {
    Dependency {
        image_index: buf[0],
        min_version: ImageVersion {
            major: buf[4],
            minor: buf[5],
            revision: u16::from_le_bytes([buf[6], buf[7]]),
            build_num: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        },
    }
}

/// Read every dependency TLV out of a slot about to become active.
/// Collects entry locations first so the iterator's borrow of `map` has
/// ended before we read each value back through it.
pub fn read_dependencies<M: FlashMap>(
    map: &mut M,
    header: &ImageHeader,
    area: FlashArea,
) -> Result<heapless::Vec<Dependency, 8>> {
    let entries: heapless::Vec<_, 8> = {
        let mut iter = tlv::iter_tlvs(map, header, area, Some(types::DEPENDENCY), true)?;
        let mut v = heapless::Vec::new();
        while let Some(e) = iter.next().transpose()? {
            let _ = v.push(e);
        }
        v
    };

    let mut out = heapless::Vec::new();
    for entry in entries {
        if entry.len as usize != DEP_ENTRY_LEN {
            continue;
        }
        let mut buf = [0u8; DEP_ENTRY_LEN];
        tlv::read_value(map, area, &entry, &mut buf)?;
        let _ = out.push(parse_dependency(&buf));
    }
    Ok(out)
}

/// The version each image index resolves to *after* applying the swap
/// decisions made so far, for dependency checking.
pub trait ResolvedVersions {
    fn version_of(&self, image_index: u8) -> Option<ImageVersion>;
}

/// Check one image's dependencies against the resolved state. Per spec
/// §4.7 step 3, a violated dependency downgrades that image's
/// `SwapType` to `None` rather than failing the whole boot.
pub fn check_dependencies(
    deps: &[Dependency],
    resolved: &impl ResolvedVersions,
    requested: SwapType,
) -> SwapType {
    for dep in deps {
        match resolved.version_of(dep.image_index) {
            Some(v) if v >= dep.min_version => continue,
            _ => return SwapType::None,
        }
    }
    requested
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(std::collections::BTreeMap<u8, ImageVersion>);
    impl ResolvedVersions for Fixed {
        fn version_of(&self, image_index: u8) -> Option<ImageVersion> {
            self.0.get(&image_index).copied()
        }
    }

    #[test]
    fn satisfied_dependency_keeps_swap_type() {
        let mut m = std::collections::BTreeMap::new();
        m.insert(1, ImageVersion { major: 2, minor: 0, revision: 0, build_num: 0 });
        let resolved = Fixed(m);
        let deps = [Dependency { image_index: 1, min_version: ImageVersion { major: 1, minor: 0, revision: 0, build_num: 0 } }];
        assert_eq!(check_dependencies(&deps, &resolved, SwapType::Test), SwapType::Test);
    }

    #[test]
    fn unsatisfied_dependency_downgrades_to_none() {
        let mut m = std::collections::BTreeMap::new();
        m.insert(1, ImageVersion { major: 0, minor: 5, revision: 0, build_num: 0 });
        let resolved = Fixed(m);
        let deps = [Dependency { image_index: 1, min_version: ImageVersion { major: 1, minor: 0, revision: 0, build_num: 0 } }];
        assert_eq!(check_dependencies(&deps, &resolved, SwapType::Perm), SwapType::None);
    }

    #[test]
    fn missing_dependency_downgrades_to_none() {
        let resolved = Fixed(std::collections::BTreeMap::new());
        let deps = [Dependency { image_index: 9, min_version: ImageVersion::default() }];
        assert_eq!(check_dependencies(&deps, &resolved, SwapType::Test), SwapType::None);
    }
}
