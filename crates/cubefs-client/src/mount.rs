//! Mount option parsing . The device string
//! encodes the master host set and the volume name; everything else comes
//! from the `-o key=value,...` style option string a host passes at
//! mount time.

use cubefs_error::{Error, Result};

/// Parsed `-o` option string plus the device string's master/volume split.
/// Every numeric/bool field has the default a bare mount (no options at
/// all) would get.
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub master_hosts: Vec<String>,
    pub volume: String,
    pub owner: String,
    pub dentry_cache_valid_ms: u64,
    pub attr_cache_valid_ms: u64,
    pub quota_cache_valid_ms: u64,
    pub enable_quota: bool,
    pub enable_rdma: bool,
    pub rdma_port: u16,
    /// Subpath within the volume this mount binds to; `/` for the whole
    /// volume.
    pub path: String,
}

const DEFAULT_DENTRY_CACHE_VALID_MS: u64 = 30_000;
const DEFAULT_ATTR_CACHE_VALID_MS: u64 = 30_000;
const DEFAULT_QUOTA_CACHE_VALID_MS: u64 = 60_000;
const DEFAULT_RDMA_PORT: u16 = 0;

impl MountOptions {
    /// `device` is `host1:port,host2:port,.../volume_name`; `options` is a
    /// comma-separated `key=value` (or bare `key` for a boolean flag)
    /// list, the same shape `mount.cubefs -o ...` accepts.
    pub fn parse(device: &str, options: &str) -> Result<Self> {
        let (hosts_part, volume) = device
            .rsplit_once('/')
            .ok_or_else(|| Error::bad_message("device string must be 'host1:port,host2:port/volume'"))?;
        if hosts_part.is_empty() || volume.is_empty() {
            return Err(Error::bad_message("device string is missing a host list or volume name"));
        }
        let master_hosts: Vec<String> = hosts_part.split(',').map(str::to_string).collect();

        let mut opts = MountOptions {
            master_hosts,
            volume: volume.to_string(),
            owner: String::new(),
            dentry_cache_valid_ms: DEFAULT_DENTRY_CACHE_VALID_MS,
            attr_cache_valid_ms: DEFAULT_ATTR_CACHE_VALID_MS,
            quota_cache_valid_ms: DEFAULT_QUOTA_CACHE_VALID_MS,
            enable_quota: false,
            enable_rdma: false,
            rdma_port: DEFAULT_RDMA_PORT,
            path: "/".to_string(),
        };

        for entry in options.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match entry.split_once('=') {
                Some(("owner", v)) => opts.owner = v.to_string(),
                Some(("dentry_cache_valid_ms", v)) => opts.dentry_cache_valid_ms = parse_u64(v)?,
                Some(("attr_cache_valid_ms", v)) => opts.attr_cache_valid_ms = parse_u64(v)?,
                Some(("quota_cache_valid_ms", v)) => opts.quota_cache_valid_ms = parse_u64(v)?,
                Some(("enable_quota", v)) => opts.enable_quota = parse_bool(v)?,
                Some(("enable_rdma", v)) => opts.enable_rdma = parse_bool(v)?,
                Some(("rdma_port", v)) => opts.rdma_port = v.parse().map_err(|_| Error::bad_message(format!("bad rdma_port: {v}")))?,
                Some(("path", v)) => opts.path = v.to_string(),
                Some((key, _)) => return Err(Error::bad_message(format!("unrecognized mount option: {key}"))),
                None if entry == "enable_quota" => opts.enable_quota = true,
                None if entry == "enable_rdma" => opts.enable_rdma = true,
                None => return Err(Error::bad_message(format!("unrecognized mount option: {entry}"))),
            }
        }

        if opts.owner.is_empty() {
            return Err(Error::bad_message("mount requires an 'owner' option"));
        }
        Ok(opts)
    }
}

fn parse_u64(v: &str) -> Result<u64> {
    v.parse().map_err(|_| Error::bad_message(format!("expected an integer, got '{v}'")))
}

fn parse_bool(v: &str) -> Result<bool> {
    match v {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::bad_message(format!("expected a boolean, got '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_and_options() {
        let opts = MountOptions::parse("10.0.0.1:17010,10.0.0.2:17010/myvol", "owner=ltptest,enable_rdma,rdma_port=4791").unwrap();
        assert_eq!(opts.master_hosts, vec!["10.0.0.1:17010", "10.0.0.2:17010"]);
        assert_eq!(opts.volume, "myvol");
        assert_eq!(opts.owner, "ltptest");
        assert!(opts.enable_rdma);
        assert_eq!(opts.rdma_port, 4791);
        assert_eq!(opts.path, "/");
    }

    #[test]
    fn rejects_missing_owner() {
        assert!(MountOptions::parse("10.0.0.1:17010/myvol", "").is_err());
    }

    #[test]
    fn rejects_malformed_device() {
        assert!(MountOptions::parse("not-a-device-string", "owner=x").is_err());
    }

    #[test]
    fn unknown_option_is_an_error() {
        assert!(MountOptions::parse("h:1/v", "owner=x,bogus=1").is_err());
    }
}
