// At the end of every 512-byte sector NTFS overwrites the last two bytes
// with the update sequence number; the real bytes live in the update
// sequence array of the structure header and must be patched back in
// before any multi-byte field crossing a sector boundary is read.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Fixup stride: one update sequence value per 512-byte sector.
pub const SECTOR_SIZE: usize = 512;

/// Result of verifying/repairing one multi-sector structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FixupOutcome {
    /// true when every sector boundary carried the expected sentinel.
    pub ok: bool,
    /// Byte offsets of sector boundaries whose sentinel did not match.
    pub mismatches: Vec<usize>,
}

/// Verify and repair the update sequence array of `buf` in place.
///
/// `fixup_offset`/`fixup_count` come from the structure header; the first
/// 2-byte value at `fixup_offset` is the sentinel every sector boundary
/// must currently contain, the following `fixup_count - 1` values are the
/// bytes to restore. Mismatches are reported, never fatal: free or
/// partially overwritten records legitimately fail this check, and the
/// caller still wants whatever fields survive. The boundary bytes are
/// always overwritten with the stored values so later field decodes see
/// the real data.
pub fn apply_fixups(buf: &mut [u8], fixup_offset: usize, fixup_count: usize) -> FixupOutcome {
    let mut outcome = FixupOutcome {
        ok: true,
        mismatches: Vec::new(),
    };

    if fixup_count < 2 {
        debug!("no sector boundaries to patch (fixup count {})", fixup_count);
        return outcome;
    }
    if fixup_offset + 2 * fixup_count > buf.len() {
        warn!(
            "update sequence array at {:#x} ({} entries) ends past the buffer",
            fixup_offset, fixup_count
        );
        outcome.ok = false;
        return outcome;
    }

    let expected = [buf[fixup_offset], buf[fixup_offset + 1]];

    for i in 1..fixup_count {
        let sector_end = i * SECTOR_SIZE - 2;
        if sector_end + 2 > buf.len() {
            warn!("sector {} ends past the buffer, stopping fixup repair", i);
            outcome.ok = false;
            break;
        }

        if buf[sector_end] != expected[0] || buf[sector_end + 1] != expected[1] {
            warn!(
                "fixup sentinel mismatch at offset {:#x} (expected {:02X}{:02X}, found {:02X}{:02X})",
                sector_end, expected[0], expected[1], buf[sector_end], buf[sector_end + 1]
            );
            outcome.ok = false;
            outcome.mismatches.push(sector_end);
        }

        // Restore the real bytes regardless of the sentinel check.
        let actual_pos = fixup_offset + 2 * i;
        buf[sector_end] = buf[actual_pos];
        buf[sector_end + 1] = buf[actual_pos + 1];
    }

    outcome
}
