/// Mount option parsing
///
/// Translates fstab-style option strings into `mount(2)` flag bits plus the
/// filesystem-specific remainder that is passed through as the data string.
use nix::mount::MsFlags;

/// Prefix of options interpreted by user space and never passed to the kernel.
pub const USER_SPACE_OPTION_PREFIX: &str = "x-";

enum OptionEffect {
    Set(MsFlags),
    Clear(MsFlags),
    /// Propagation changes need a separate mount(2) call and are not supported.
    Propagation,
    Nothing,
}

fn option_effect(option: &str) -> Option<OptionEffect> {
    use OptionEffect::*;

    let effect = match option {
        "ro" => Set(MsFlags::MS_RDONLY),
        "rw" => Clear(MsFlags::MS_RDONLY),
        "nosuid" => Set(MsFlags::MS_NOSUID),
        "suid" => Clear(MsFlags::MS_NOSUID),
        "nodev" => Set(MsFlags::MS_NODEV),
        "dev" => Clear(MsFlags::MS_NODEV),
        "noexec" => Set(MsFlags::MS_NOEXEC),
        "exec" => Clear(MsFlags::MS_NOEXEC),
        "sync" => Set(MsFlags::MS_SYNCHRONOUS),
        "async" => Clear(MsFlags::MS_SYNCHRONOUS),
        "dirsync" => Set(MsFlags::MS_DIRSYNC),
        "mand" => Set(MsFlags::MS_MANDLOCK),
        "nomand" => Clear(MsFlags::MS_MANDLOCK),
        "noatime" => Set(MsFlags::MS_NOATIME),
        "atime" => Clear(MsFlags::MS_NOATIME),
        "nodiratime" => Set(MsFlags::MS_NODIRATIME),
        "diratime" => Clear(MsFlags::MS_NODIRATIME),
        "relatime" => Set(MsFlags::MS_RELATIME),
        "norelatime" => Clear(MsFlags::MS_RELATIME),
        "strictatime" => Set(MsFlags::MS_STRICTATIME),
        "silent" => Set(MsFlags::MS_SILENT),
        "loud" => Clear(MsFlags::MS_SILENT),
        "remount" => Set(MsFlags::MS_REMOUNT),
        "bind" => Set(MsFlags::MS_BIND),
        "rbind" => Set(MsFlags::MS_BIND | MsFlags::MS_REC),
        "move" => Set(MsFlags::MS_MOVE),
        "shared" | "rshared" | "slave" | "rslave" | "private" | "rprivate" | "unbindable"
        | "runbindable" => Propagation,
        "defaults" => Nothing,
        _ => return None,
    };
    Some(effect)
}

/// Split mount options into kernel flags and the unparsed remainder.
///
/// User-space options (`x-` prefix) are dropped entirely. Propagation
/// options are consumed but produce no flags.
pub fn options_to_flags<S: AsRef<str>>(options: &[S]) -> (MsFlags, Vec<String>) {
    let mut flags = MsFlags::empty();
    let mut unparsed = Vec::new();

    for option in options.iter().map(AsRef::as_ref) {
        if option.starts_with(USER_SPACE_OPTION_PREFIX) {
            continue;
        }
        match option_effect(option) {
            Some(OptionEffect::Set(bits)) => flags.insert(bits),
            Some(OptionEffect::Clear(bits)) => flags.remove(bits),
            Some(OptionEffect::Propagation) => {
                log::debug!("Ignoring propagation mount option {:?}", option);
            }
            Some(OptionEffect::Nothing) => {}
            None => unparsed.push(option.to_string()),
        }
    }

    (flags, unparsed)
}
