/// Profile differ
///
/// Computes the ordered list of changes that turns the current mount
/// profile into the desired one. Pure computation: no syscalls, no errors.
use crate::core::change::{Action, Change};
use crate::profile::{MountEntry, MountProfile};
use crate::utils::path::{clean_path, is_same_or_descendant, magic_dir_cmp, with_trailing_slash};
use std::collections::{HashMap, HashSet};

/// Filesystem type whose reuse is decided by the entries mounted under it
const OVERLAY_FS_TYPE: &str = "overlay";

fn normalized(profile: &MountProfile) -> Vec<MountEntry> {
    let mut entries: Vec<MountEntry> = profile
        .entries
        .iter()
        .cloned()
        .map(|mut entry| {
            entry.dir = clean_path(&entry.dir);
            entry
        })
        .collect();
    entries.sort_by(|a, b| magic_dir_cmp(&a.dir, &b.dir));
    entries
}

/// Directories of current entries that can stay mounted as they are.
fn reusable_dirs(current: &[MountEntry], desired: &[MountEntry]) -> HashSet<String> {
    // Later entries with the same directory win.
    let desired_by_dir: HashMap<&str, &MountEntry> =
        desired.iter().map(|entry| (entry.dir.as_str(), entry)).collect();

    let mut reuse = HashSet::new();
    let mut skip_prefix: Option<String> = None;
    let mut last_overlay: Option<&MountEntry> = None;

    for entry in current {
        if let Some(prefix) = &skip_prefix {
            if entry.dir.starts_with(prefix.as_str()) {
                continue;
            }
        }
        skip_prefix = None;

        if entry.fs_type == OVERLAY_FS_TYPE {
            last_overlay = Some(entry);
            continue;
        }

        if desired_by_dir.get(entry.dir.as_str()) == Some(&entry) {
            reuse.insert(entry.dir.clone());
            if let Some(overlay) = last_overlay {
                if is_same_or_descendant(&entry.dir, &overlay.dir) {
                    reuse.insert(overlay.dir.clone());
                }
            }
            continue;
        }

        skip_prefix = Some(with_trailing_slash(&entry.dir));
    }

    reuse
}

/// Changes that transform `current` into `desired`.
///
/// Current entries come first in reverse magic-directory order, each either
/// kept or unmounted, so children are unmounted before their parents. Desired
/// entries that are not reused follow in forward order, so parents are
/// mounted before their children. Kept entries are emitted in place; they
/// perform nothing and record what stayed mounted.
pub fn needed_changes(current: &MountProfile, desired: &MountProfile) -> Vec<Change> {
    let current = normalized(current);
    let desired = normalized(desired);
    let reuse = reusable_dirs(&current, &desired);

    let mut changes = Vec::with_capacity(current.len() + desired.len());

    for entry in current.into_iter().rev() {
        let action = if reuse.contains(&entry.dir) {
            Action::Keep
        } else {
            Action::Unmount
        };
        changes.push(Change::new(action, entry));
    }

    for entry in desired {
        if !reuse.contains(&entry.dir) {
            changes.push(Change::new(Action::Mount, entry));
        }
    }

    log::debug!(
        "Computed {} changes ({} to unmount, {} to mount)",
        changes.len(),
        changes.iter().filter(|c| c.action == Action::Unmount).count(),
        changes.iter().filter(|c| c.action == Action::Mount).count()
    );

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, dir: &str, fs_type: &str) -> MountEntry {
        MountEntry::new::<&str>(name, dir, fs_type, &[])
    }

    fn profile(entries: Vec<MountEntry>) -> MountProfile {
        MountProfile::new(entries)
    }

    #[test]
    fn test_nothing_to_do() {
        let changes = needed_changes(&MountProfile::default(), &MountProfile::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_mount_when_current_is_empty() {
        let desired = profile(vec![entry("/a", "/mnt", "ext4")]);
        let changes = needed_changes(&MountProfile::default(), &desired);
        assert_eq!(changes, vec![Change::new(Action::Mount, entry("/a", "/mnt", "ext4"))]);
    }

    #[test]
    fn test_unmount_when_desired_is_empty() {
        let current = profile(vec![entry("/a", "/mnt", "")]);
        let changes = needed_changes(&current, &MountProfile::default());
        assert_eq!(changes, vec![Change::new(Action::Unmount, entry("/a", "/mnt", ""))]);
    }

    #[test]
    fn test_identical_profiles_are_kept() {
        let current = profile(vec![
            entry("/a", "/common/stuff", ""),
            entry("/b", "/common/stuff/extra", ""),
        ]);
        let changes = needed_changes(&current, &current);
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Keep, entry("/b", "/common/stuff/extra", "")),
                Change::new(Action::Keep, entry("/a", "/common/stuff", "")),
            ]
        );
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let current = profile(vec![entry("/a", "/mnt/", "")]);
        let desired = profile(vec![entry("/a", "/mnt", "")]);
        let changes = needed_changes(&current, &desired);
        assert_eq!(changes, vec![Change::new(Action::Keep, entry("/a", "/mnt", ""))]);
    }

    #[test]
    fn test_changed_parent_remounts_children() {
        let current = profile(vec![
            entry("/a", "/common/stuff", ""),
            entry("/b", "/common/stuff/extra", ""),
        ]);
        let desired = profile(vec![
            entry("/a-changed", "/common/stuff", ""),
            entry("/b", "/common/stuff/extra", ""),
        ]);
        let changes = needed_changes(&current, &desired);
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Unmount, entry("/b", "/common/stuff/extra", "")),
                Change::new(Action::Unmount, entry("/a", "/common/stuff", "")),
                Change::new(Action::Mount, entry("/a-changed", "/common/stuff", "")),
                Change::new(Action::Mount, entry("/b", "/common/stuff/extra", "")),
            ]
        );
    }

    #[test]
    fn test_changed_child_keeps_parent() {
        let current = profile(vec![
            entry("/a", "/common/stuff", ""),
            entry("/b", "/common/stuff/extra", ""),
        ]);
        let desired = profile(vec![
            entry("/a", "/common/stuff", ""),
            entry("/b-changed", "/common/stuff/extra", ""),
        ]);
        let changes = needed_changes(&current, &desired);
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Unmount, entry("/b", "/common/stuff/extra", "")),
                Change::new(Action::Keep, entry("/a", "/common/stuff", "")),
                Change::new(Action::Mount, entry("/b-changed", "/common/stuff/extra", "")),
            ]
        );
    }

    #[test]
    fn test_textual_prefix_sibling_is_not_a_child() {
        let current = profile(vec![
            entry("/a", "/foo", ""),
            entry("/b", "/foo-bar", ""),
        ]);
        let desired = profile(vec![
            entry("/a-changed", "/foo", ""),
            entry("/b", "/foo-bar", ""),
        ]);
        let changes = needed_changes(&current, &desired);
        // "/foo-bar" sorts before "/foo" and survives the change of "/foo".
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Unmount, entry("/a", "/foo", "")),
                Change::new(Action::Keep, entry("/b", "/foo-bar", "")),
                Change::new(Action::Mount, entry("/a-changed", "/foo", "")),
            ]
        );
    }

    #[test]
    fn test_option_order_does_not_force_remount() {
        let current = profile(vec![MountEntry::new("/a", "/mnt", "", &["bind", "ro"])]);
        let desired = profile(vec![MountEntry::new("/a", "/mnt", "", &["ro", "bind"])]);
        let changes = needed_changes(&current, &desired);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, Action::Keep);
    }

    #[test]
    fn test_overlay_is_kept_when_content_is_reused() {
        let overlay = entry("overlay", "/x", "overlay");
        let bind = MountEntry::new("/src", "/x/y", "", &["bind"]);
        let current = profile(vec![overlay.clone(), bind.clone()]);
        let desired = profile(vec![bind.clone()]);

        let changes = needed_changes(&current, &desired);
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Keep, bind),
                Change::new(Action::Keep, overlay),
            ]
        );
    }

    #[test]
    fn test_overlay_is_not_kept_for_textual_prefix() {
        let overlay = entry("overlay", "/x", "overlay");
        let bind = MountEntry::new("/src", "/xy", "", &["bind"]);
        let current = profile(vec![overlay.clone(), bind.clone()]);
        let desired = profile(vec![bind.clone()]);

        let changes = needed_changes(&current, &desired);
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Keep, bind),
                Change::new(Action::Unmount, overlay),
            ]
        );
    }

    #[test]
    fn test_overlay_without_reused_content_is_unmounted() {
        let overlay = entry("overlay", "/x", "overlay");
        let current = profile(vec![overlay.clone()]);
        let changes = needed_changes(&current, &profile(vec![overlay.clone()]));
        // Overlays are never matched directly, so the desired one is mounted again.
        assert_eq!(
            changes,
            vec![
                Change::new(Action::Unmount, overlay.clone()),
                Change::new(Action::Mount, overlay),
            ]
        );
    }

    #[test]
    fn test_mounts_are_sorted_parent_first() {
        let desired = profile(vec![
            entry("/c", "/a/b/c", ""),
            entry("/a", "/a", ""),
            entry("/b", "/a/b", ""),
        ]);
        let changes = needed_changes(&MountProfile::default(), &desired);
        let dirs: Vec<&str> = changes.iter().map(|c| c.entry.dir.as_str()).collect();
        assert_eq!(dirs, vec!["/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn test_inputs_are_not_modified() {
        let current = profile(vec![entry("/b", "/b/", ""), entry("/a", "/a", "")]);
        let snapshot = current.clone();
        let _ = needed_changes(&current, &MountProfile::default());
        assert_eq!(current.entries[0].dir, snapshot.entries[0].dir);
    }
}
