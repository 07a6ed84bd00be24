//! Invite links: a room id carried as the `room` query parameter of a URL.

use url::Url;

use crate::identity::{RoomId, RoomIdError};

pub const ROOM_PARAM: &str = "room";

/// Link a partner opens to join `room`. Existing `room` parameters on `base` are replaced.
pub fn invite_link(base: &Url, room: &RoomId) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != ROOM_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(ROOM_PARAM, room.as_str());
    url
}

/// Room id from an invite: a URL with a `room` parameter, or a bare room id.
pub fn room_from_invite(invite: &str) -> Result<RoomId, RoomIdError> {
    let invite = invite.trim();
    match Url::parse(invite) {
        Ok(url) => {
            let room = url
                .query_pairs()
                .find(|(k, _)| k == ROOM_PARAM)
                .map(|(_, v)| v.into_owned())
                .ok_or(RoomIdError::MissingRoom)?;
            RoomId::parse(&room)
        }
        Err(_) => RoomId::parse(invite),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_roundtrips_room() {
        let base = Url::parse("https://deeptalk.app/play").unwrap();
        let room = RoomId::generate();
        let link = invite_link(&base, &room);
        assert_eq!(room_from_invite(link.as_str()).unwrap(), room);
        assert!(link.as_str().starts_with("https://deeptalk.app/play?room="));
    }

    #[test]
    fn link_replaces_stale_room_and_keeps_other_params() {
        let base = Url::parse("https://deeptalk.app/?lang=ru&room=old").unwrap();
        let room = RoomId::parse("new1").unwrap();
        let link = invite_link(&base, &room);
        assert_eq!(link.query(), Some("lang=ru&room=new1"));
    }

    #[test]
    fn bare_room_id_accepted() {
        assert_eq!(room_from_invite(" ab12cd34 ").unwrap().as_str(), "ab12cd34");
    }

    #[test]
    fn url_without_room_rejected() {
        assert_eq!(
            room_from_invite("https://deeptalk.app/?lang=ru"),
            Err(RoomIdError::MissingRoom)
        );
    }

    #[test]
    fn url_with_bad_room_rejected() {
        assert_eq!(
            room_from_invite("https://deeptalk.app/?room=a%20b"),
            Err(RoomIdError::InvalidChar)
        );
    }
}
