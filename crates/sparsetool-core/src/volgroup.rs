//! Free-extent reclamation inside LVM volume groups.
//!
//! Free extents are invisible to any filesystem mount, so each non-ignored
//! group gets a disposable logical volume consuming all of its free
//! extents. Zeroing that volume and removing it returns the extents to the
//! free pool with zeroed content, which the converter can then detect as
//! holes.

use std::collections::HashSet;

use crate::error::Result;
use crate::names::NameSource;
use crate::session::DiskSession;

/// Percentage of a group's free extents the disposable volume consumes.
const FREE_EXTENT_PERCENT: u32 = 100;

/// Length of the randomized logical volume name. Random so it cannot
/// collide with guest-defined logical volumes.
const LV_NAME_LEN: usize = 8;

/// Reclaim the free extents of every non-ignored volume group, in sorted
/// order. Ignore entries match group names directly, without
/// canonicalization.
pub fn reclaim_volume_groups(
    session: &mut DiskSession,
    ignore: &[String],
    names: &mut dyn NameSource,
) -> Result<()> {
    let ignored: HashSet<&str> = ignore.iter().map(String::as_str).collect();

    for vg in session.volume_groups()? {
        if ignored.contains(vg.name.as_str()) {
            tracing::debug!(volgroup = %vg.name, "ignored, leaving untouched");
            continue;
        }

        let logvol = names.random_chars(LV_NAME_LEN);
        if !session.lvcreate_free(&logvol, &vg.name, FREE_EXTENT_PERCENT)? {
            // Commonly: no free extents in this group.
            tracing::debug!(volgroup = %vg.name, "no logical volume created, skipping");
            continue;
        }

        let device = format!("/dev/{}/{}", vg.name, logvol);
        tracing::info!(volgroup = %vg.name, device = %device, "zeroing free extents");
        session.zero_device(&device)?;
        session.sync()?;
        session.lvremove(&device)?;
    }

    Ok(())
}
