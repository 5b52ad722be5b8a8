//! Serialization format negotiation (spec.md §4.E). Version 0 is the
//! canonical binary format and never expires.

use crate::error::P2pError;

#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub id: u32,
    /// Unix-seconds deadline after which this format must not be adopted.
    pub expires: Option<u64>,
}

/// Negotiate the format both sides will use for this session.
///
/// - if the remote's preferred id is higher and `local_recognizes` it,
///   adopt the remote's id;
/// - if higher and unrecognized, adopt `local_id` (remote is expected to
///   downgrade);
/// - if lower and `remote_preferred < first_version_to_know_local` (the
///   remote predates our format), adopt the remote's lower id;
/// - otherwise both sides adopt `local_id`.
///
/// `now` is checked against the chosen format's `expires`.
pub fn negotiate(
    local_id: u32,
    remote_preferred: u32,
    local_recognizes: impl Fn(u32) -> bool,
    first_version_to_know_local: u32,
    format_info: impl Fn(u32) -> FormatInfo,
    now: u64,
) -> Result<u32, P2pError> {
    let chosen = if remote_preferred > local_id {
        if local_recognizes(remote_preferred) {
            remote_preferred
        } else {
            local_id
        }
    } else if remote_preferred < local_id {
        if remote_preferred < first_version_to_know_local {
            remote_preferred
        } else {
            local_id
        }
    } else {
        local_id
    };

    let info = format_info(chosen);
    if let Some(expires) = info.expires {
        if expires <= now {
            return Err(P2pError::ExpiredFormat(chosen));
        }
    }
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32) -> FormatInfo {
        FormatInfo { id, expires: None }
    }

    #[test]
    fn adopts_remotes_higher_known_format() {
        let chosen = negotiate(1, 2, |id| id <= 2, 0, info, 0).unwrap();
        assert_eq!(chosen, 2);
    }

    #[test]
    fn falls_back_to_local_when_remotes_higher_format_is_unknown() {
        let chosen = negotiate(1, 5, |id| id <= 2, 0, info, 0).unwrap();
        assert_eq!(chosen, 1);
    }

    #[test]
    fn downgrades_to_remotes_older_format_when_remote_predates_local() {
        let chosen = negotiate(3, 0, |_| true, 1, info, 0).unwrap();
        assert_eq!(chosen, 0);
    }

    #[test]
    fn keeps_local_when_remote_is_lower_but_knows_local() {
        let chosen = negotiate(3, 1, |_| true, 0, info, 0).unwrap();
        assert_eq!(chosen, 3);
    }

    #[test]
    fn expired_chosen_format_is_rejected() {
        let expiring = |id| FormatInfo { id, expires: Some(100) };
        let err = negotiate(1, 1, |_| true, 0, expiring, 200).unwrap_err();
        assert!(matches!(err, P2pError::ExpiredFormat(1)));
    }
}
