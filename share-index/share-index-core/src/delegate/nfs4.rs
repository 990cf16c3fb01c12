//! NFSv4 ACLs as exposed through the `system.nfs4_acl` extended attribute.
//!
//! The attribute value is XDR: a big-endian ACE count followed by that many
//! ACEs of `type`, `flag`, `access_mask`, `who` (length-prefixed, padded to a
//! four byte boundary).

use std::path::Path;

use crate::acl::{AclViews, InheritFlags, PrincipalKind, RawAce};
use crate::error::PermissionReadError;

pub const NFS4_ACL_XATTR: &str = "system.nfs4_acl";

pub const ACE_ACCESS_ALLOWED: u32 = 0;
pub const ACE_ACCESS_DENIED: u32 = 1;
pub const ACE_SYSTEM_AUDIT: u32 = 2;
pub const ACE_SYSTEM_ALARM: u32 = 3;

pub const ACE_IDENTIFIER_GROUP: u32 = 0x40;

pub const ACE_READ_DATA: u32 = 0x1;

/// Parse an attribute value into direct and inherited entries.
///
/// Audit and alarm entries carry no access decision and are skipped.
pub fn parse_acl(data: &[u8]) -> Result<AclViews, String> {
    let mut reader = Reader { data, offset: 0 };
    let count = reader.u32()?;
    let mut aces = Vec::new();
    for _ in 0..count {
        let ace_type = reader.u32()?;
        let flags = reader.u32()?;
        let mask = reader.u32()?;
        let who = reader.string()?;

        let ace = match ace_type {
            ACE_ACCESS_ALLOWED => RawAce::allow(who),
            ACE_ACCESS_DENIED => RawAce::deny(who),
            ACE_SYSTEM_AUDIT | ACE_SYSTEM_ALARM => continue,
            other => return Err(format!("unknown ACE type {other}")),
        };
        let mut ace = ace
            .with_mask(mask)
            .with_flags(InheritFlags::from_bits_truncate(flags));
        let special_group = matches!(ace.entry.principal.as_str(), "GROUP@" | "EVERYONE@");
        if flags & ACE_IDENTIFIER_GROUP != 0 || special_group {
            ace.entry.kind = PrincipalKind::Group;
        }
        aces.push(ace);
    }
    if reader.offset != data.len() {
        return Err(format!("{} trailing bytes", data.len() - reader.offset));
    }
    Ok(AclViews::from_entries(aces))
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], String> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| "truncated ACL".to_string())?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, String> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<String, String> {
        let len = self.u32()? as usize;
        let who = std::str::from_utf8(self.take(len)?)
            .map_err(|_| "invalid UTF-8 in ACE principal".to_string())?
            .to_owned();
        self.take((4 - len % 4) % 4)?;
        Ok(who)
    }
}

/// Read and parse the node's NFSv4 ACL. `Ok(None)` when the filesystem has
/// no such attribute for the node.
#[cfg(unix)]
pub fn read_acl(path: &Path) -> Result<Option<AclViews>, PermissionReadError> {
    use std::io;

    match xattr::get(path, NFS4_ACL_XATTR) {
        Ok(Some(data)) => parse_acl(&data)
            .map(Some)
            .map_err(|reason| PermissionReadError::Malformed {
                path: path.to_path_buf(),
                reason,
            }),
        Ok(None) => Ok(None),
        Err(e)
            if e.kind() == io::ErrorKind::Unsupported
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP) =>
        {
            Ok(None)
        }
        Err(e) => Err(PermissionReadError::from_io(path, e)),
    }
}

#[cfg(not(unix))]
pub fn read_acl(_path: &Path) -> Result<Option<AclViews>, PermissionReadError> {
    Ok(None)
}
