// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use libadir::{
    error::{Code, Coded},
    Cid,
};
use tonic::Status;

/// Map a classified library error onto the wire status.
pub fn status<E>(e: E) -> Status
where
    E: Coded + std::fmt::Display,
{
    let message = e.to_string();
    match e.code() {
        Code::Invalid => Status::invalid_argument(message),
        Code::NotFound => Status::not_found(message),
        Code::FailedPrecondition => Status::failed_precondition(message),
        Code::Unavailable => Status::unavailable(message),
        Code::Internal => Status::internal(message),
        Code::Unimplemented => Status::unimplemented(message),
    }
}

/// Parse a wire CID.
pub fn parse_cid(cid: &str) -> Result<Cid, Status> {
    if cid.is_empty() {
        return Err(Status::invalid_argument("empty CID"));
    }
    cid.parse::<Cid>()
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_parsing_guards_the_boundary() {
        assert!(parse_cid("").is_err());
        assert!(parse_cid("not-a-cid").is_err());

        let cid = Cid::digest(b"x");
        assert_eq!(parse_cid(&cid.to_string()).unwrap(), cid);
    }
}
