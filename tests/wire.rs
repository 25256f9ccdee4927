//! Wire-format laws exercised through the public API.

use clissh::{msg::DisconnectReason, Algorithms, Buffer, NameList};

#[test]
fn buffer_accessors_round_trip() {
    let mut buffer = Buffer::with_message(20);
    buffer.put_u32(0x0102_0304);
    buffer.put_bool(true);
    buffer.put_string(b"ssh-userauth");
    buffer.put_mpint(&[0x12, 0x34]);

    assert_eq!(buffer.get_u8().unwrap(), 20);
    assert_eq!(buffer.get_u32().unwrap(), 0x0102_0304);
    assert!(buffer.get_bool().unwrap());
    assert_eq!(buffer.get_string().unwrap(), b"ssh-userauth");
    assert_eq!(buffer.get_mpint().unwrap(), vec![0x12, 0x34]);
    assert_eq!(buffer.available(), 0);
}

#[test]
fn mpint_zero_is_four_zero_bytes() {
    let mut buffer = Buffer::new();
    buffer.put_mpint(&[]);

    assert_eq!(buffer.as_slice(), &[0, 0, 0, 0]);
    assert!(buffer.get_mpint().unwrap().is_empty());
}

#[test]
fn the_wire_constants_match_the_rfc() {
    assert_eq!(clissh::msg::DISCONNECT, 1);
    assert_eq!(clissh::msg::IGNORE, 2);
    assert_eq!(clissh::msg::UNIMPLEMENTED, 3);
    assert_eq!(clissh::msg::DEBUG, 4);
    assert_eq!(clissh::msg::SERVICE_REQUEST, 5);
    assert_eq!(clissh::msg::SERVICE_ACCEPT, 6);
    assert_eq!(clissh::msg::KEXINIT, 20);
    assert_eq!(clissh::msg::NEWKEYS, 21);

    assert_eq!(DisconnectReason::KeyExchangeFailed.code(), 3);
    assert_eq!(DisconnectReason::HostKeyNotVerifiable.code(), 9);
}

#[test]
fn every_default_algorithm_name_parses_back() {
    let algorithms = Algorithms::default();

    for kex in &algorithms.kexs {
        let name: &str = kex.as_ref();
        assert_eq!(name.parse::<clissh::algorithm::Kex>().unwrap(), *kex);
    }
    for cipher in &algorithms.ciphers {
        let name: &str = cipher.as_ref();
        assert_eq!(name.parse::<clissh::algorithm::Cipher>().unwrap(), *cipher);
    }
    for mac in &algorithms.macs {
        let name: &str = mac.as_ref();
        assert_eq!(name.parse::<clissh::algorithm::Hmac>().unwrap(), *mac);
    }
}

#[test]
fn name_list_preference_is_left_biased() {
    let ours: NameList = ["a", "b", "c"].into_iter().collect();
    let theirs: NameList = ["c", "b"].into_iter().collect();

    assert_eq!(ours.preferred_in(&theirs), Some("b"));
    assert_eq!(theirs.preferred_in(&ours), Some("c"));
    assert!(ours.preferred_in(&NameList::default()).is_none());
}
