//! MODE processing against channels and users

mod common;

use common::*;
use modircd_core::*;
use tokio::sync::mpsc::UnboundedReceiver;

struct Room {
    server: Server,
    alice: UserId,
    alice_rx: UnboundedReceiver<String>,
    bob: UserId,
    bob_rx: UnboundedReceiver<String>,
}

/// `alice` creates `#c` (and so holds op), `bob` joins it
fn room(extra: &str) -> Room {
    let mut server = server(extra);
    let (alice, mut alice_rx) = connect(&mut server, "alice");
    let (bob, mut bob_rx) = connect(&mut server, "bob");
    assert!(server.join_channel(alice, "#c", None));
    assert!(server.join_channel(bob, "#c", None));
    drain(&mut alice_rx);
    drain(&mut bob_rx);
    Room {
        server,
        alice,
        alice_rx,
        bob,
        bob_rx,
    }
}

/// Connect `nick` and discard the registration burst
fn registered(server: &mut Server, nick: &str) -> (UserId, UnboundedReceiver<String>) {
    let (id, mut rx) = connect(server, nick);
    drain(&mut rx);
    (id, rx)
}

const ALICE: &str = "alice!alice@host.example.com";
const BOB: &str = "bob!bob@host.example.com";

#[test]
fn test_creator_is_op() {
    let r = room("");
    let channel = r.server.channel("#c").unwrap();
    assert!(channel.member(r.alice).unwrap().has('o'));
    assert!(!channel.member(r.bob).unwrap().has('o'));
}

#[test]
fn test_rank_errors() {
    let mut r = room("");
    r.server.process_mode(Some(r.bob), "#c", "+o", &params(&["bob"]));
    r.server.process_mode(Some(r.bob), "#c", "+v", &params(&["bob"]));
    r.server.process_mode(Some(r.bob), "#c", "+m", &[]);
    assert_eq!(
        drain(&mut r.bob_rx),
        vec![
            ":irc.test 482 bob #c :You're not a channel operator",
            ":irc.test 482 bob #c :You're not a channel (half)operator",
            ":irc.test 482 bob #c :You're not a channel operator",
        ]
    );
    assert!(drain(&mut r.alice_rx).is_empty());
    assert!(!r.server.channel("#c").unwrap().has_mode('m'));
}

#[test]
fn test_op_grant_is_relayed_to_members() {
    let mut r = room("");
    let outcome = r.server.process_mode(Some(r.alice), "#c", "+o", &params(&["bob"]));
    assert_eq!(outcome.line().as_deref(), Some("+o bob"));
    let relay = format!(":{} MODE #c +o bob", ALICE);
    assert_eq!(drain(&mut r.alice_rx), vec![relay.clone()]);
    assert_eq!(drain(&mut r.bob_rx), vec![relay]);
    assert!(r.server.channel("#c").unwrap().member(r.bob).unwrap().has('o'));
}

#[test]
fn test_prefix_target_errors() {
    let mut r = room("");
    let (_carol, _carol_rx) = connect(&mut r.server, "carol");
    r.server.process_mode(Some(r.alice), "#c", "+oo", &params(&["carol", "ghost"]));
    assert_eq!(
        drain(&mut r.alice_rx),
        vec![
            ":irc.test 441 alice carol #c :They aren't on that channel",
            ":irc.test 401 alice ghost :No such nick/channel",
        ]
    );
}

#[test]
fn test_unknown_channel_mode_and_channel() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+Q", &[]);
    r.server.process_mode(Some(r.alice), "#nowhere", "+m", &[]);
    assert_eq!(
        drain(&mut r.alice_rx),
        vec![
            ":irc.test 472 alice Q :is unknown mode char to me",
            ":irc.test 403 alice #nowhere :No such channel",
        ]
    );
}

#[test]
fn test_relay_carries_only_applied_changes() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+n", &[]);
    drain(&mut r.alice_rx);
    drain(&mut r.bob_rx);

    // +n is already set and bob has no voice to remove
    let outcome = r
        .server
        .process_mode(Some(r.alice), "#c", "+nt-v+o", &params(&["bob", "bob"]));
    assert_eq!(outcome.line().as_deref(), Some("+to bob"));
    assert_eq!(drain(&mut r.bob_rx), vec![format!(":{} MODE #c +to bob", ALICE)]);

    // Nothing changes, nothing is relayed
    let outcome = r.server.process_mode(Some(r.alice), "#c", "+nt", &[]);
    assert!(outcome.line().is_none());
    assert!(drain(&mut r.alice_rx).is_empty());
    assert!(drain(&mut r.bob_rx).is_empty());
}

#[test]
fn test_channel_mode_query_hides_key_from_outsiders() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+kl", &params(&["secret", "5"]));
    drain(&mut r.alice_rx);
    let (carol, mut carol_rx) = registered(&mut r.server, "carol");

    r.server.process_mode(Some(r.alice), "#c", "", &[]);
    r.server.process_mode(Some(carol), "#c", "", &[]);
    assert_eq!(drain(&mut r.alice_rx), vec![":irc.test 324 alice #c +kl secret :5"]);
    assert_eq!(drain(&mut carol_rx), vec![":irc.test 324 carol #c +kl <key> :5"]);
}

#[test]
fn test_user_modes() {
    let mut r = room("");
    let outcome = r.server.process_mode(Some(r.alice), "alice", "+iw", &[]);
    assert_eq!(outcome.line().as_deref(), Some("+iw"));
    r.server.process_mode(Some(r.alice), "alice", "", &[]);
    r.server.process_mode(Some(r.alice), "alice", "+Q", &[]);
    assert_eq!(
        drain(&mut r.alice_rx),
        vec![
            format!(":{} MODE alice :+iw", ALICE),
            ":irc.test 221 alice :+iw".to_string(),
            ":irc.test 501 alice :Unknown MODE flag".to_string(),
        ]
    );
}

#[test]
fn test_other_users_modes_are_private() {
    let mut r = room("");
    r.server.process_mode(Some(r.bob), "alice", "", &[]);
    r.server.process_mode(Some(r.bob), "alice", "+i", &[]);
    assert_eq!(
        drain(&mut r.bob_rx),
        vec![
            ":irc.test 502 bob :Can't view modes for other users",
            ":irc.test 502 bob :Can't change mode for other users",
        ]
    );
    assert!(!r.server.user(r.alice).unwrap().has_mode('i'));

    // Operators may look
    r.server.set_oper(r.bob, "NetAdmin");
    drain(&mut r.bob_rx);
    r.server.process_mode(Some(r.bob), "alice", "", &[]);
    assert_eq!(drain(&mut r.bob_rx), vec![":irc.test 221 bob :+"]);
}

#[test]
fn test_oper_mode_can_only_be_dropped() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "alice", "+o", &[]);
    assert!(drain(&mut r.alice_rx).is_empty());

    r.server.set_oper(r.alice, "NetAdmin");
    assert_eq!(drain(&mut r.alice_rx), vec![":alice MODE alice :+o"]);
    r.server.process_mode(Some(r.alice), "alice", "-o", &[]);
    assert_eq!(drain(&mut r.alice_rx), vec![format!(":{} MODE alice :-o", ALICE)]);
    assert!(!r.server.user(r.alice).unwrap().is_operator());
}

#[test]
fn test_halfop_may_drop_own_status() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+h", &params(&["bob"]));
    drain(&mut r.alice_rx);
    drain(&mut r.bob_rx);

    // A halfop cannot hand out halfop
    r.server.process_mode(Some(r.bob), "#c", "+h", &params(&["alice"]));
    assert_eq!(
        drain(&mut r.bob_rx),
        vec![":irc.test 482 bob #c :You're not a channel operator"]
    );

    r.server.process_mode(Some(r.bob), "#c", "-h", &params(&["bob"]));
    assert_eq!(drain(&mut r.alice_rx), vec![format!(":{} MODE #c -h bob", BOB)]);
    assert!(!r.server.channel("#c").unwrap().member(r.bob).unwrap().has('h'));
}

#[test]
fn test_disabled_halfop() {
    let mut r = room("[options]\nallow_halfop = false\n");
    assert!(r.server.isupport().contains(&"PREFIX=(ov)@+".to_string()));
    let outcome = r.server.process_mode(Some(r.alice), "#c", "+h", &params(&["bob"]));
    assert!(outcome.applied.is_empty());
    assert!(drain(&mut r.alice_rx).is_empty());
}

#[test]
fn test_default_prefix_token() {
    let mut server = server("");
    assert!(server.isupport().contains(&"PREFIX=(ohv)@%+".to_string()));
}

#[test]
fn test_access_hook_overrides_rank() {
    let mut server = server("[modules]\nload = [\"gatekeeper\"]\n");
    let (alice, _alice_rx) = connect(&mut server, "alice");
    let (trusted, mut trusted_rx) = connect(&mut server, "trusted");
    server.join_channel(alice, "#c", None);
    server.join_channel(trusted, "#c", None);
    drain(&mut trusted_rx);

    let outcome = server.process_mode(Some(trusted), "#c", "+m", &[]);
    assert_eq!(outcome.line().as_deref(), Some("+m"));
    assert_eq!(
        drain(&mut trusted_rx),
        vec![":trusted!trusted@host.example.com MODE #c +m"]
    );
}

#[test]
fn test_server_source_skips_access_checks() {
    let mut r = room("");
    let outcome = r.server.process_mode(None, "#c", "+mo", &params(&["bob"]));
    assert_eq!(outcome.line().as_deref(), Some("+mo bob"));
    assert_eq!(drain(&mut r.bob_rx), vec![":irc.test MODE #c +mo bob"]);
}

#[test]
fn test_ban_list_and_join_refusal() {
    let mut server = server("");
    let (alice, mut alice_rx) = connect(&mut server, "alice");
    let (bob, mut bob_rx) = connect_from(&mut server, "bob", "10.0.0.2", "bob.example.org");
    server.join_channel(alice, "#c", None);
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let outcome = server.process_mode(Some(alice), "#c", "+b", &params(&["*!*@bob.example.org"]));
    assert_eq!(outcome.line().as_deref(), Some("+b *!*@bob.example.org"));
    drain(&mut alice_rx);

    assert!(!server.join_channel(bob, "#c", None));
    assert_eq!(
        drain(&mut bob_rx),
        vec![":irc.test 474 bob #c :Cannot join channel (+b)"]
    );

    // An IP ban catches the same user
    server.process_mode(Some(alice), "#c", "-b+b", &params(&["*!*@bob.example.org", "*!*@10.0.0.*"]));
    assert!(!server.join_channel(bob, "#c", None));
    drain(&mut bob_rx);

    server.process_mode(Some(alice), "#c", "b", &[]);
    let lines = drain(&mut alice_rx);
    let listing: Vec<&String> = lines.iter().filter(|l| l.contains(" 367 ") || l.contains(" 368 ")).collect();
    assert_eq!(listing.len(), 2);
    assert!(listing[0].starts_with(":irc.test 367 alice #c *!*@10.0.0.* alice "));
    assert_eq!(listing[1], ":irc.test 368 alice #c :End of channel ban list");
}

#[test]
fn test_key_and_limit() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+kl", &params(&["secret", "2"]));
    let (carol, mut carol_rx) = registered(&mut r.server, "carol");

    assert!(!r.server.join_channel(carol, "#c", None));
    assert!(!r.server.join_channel(carol, "#c", Some("wrong")));
    assert!(!r.server.join_channel(carol, "#c", Some("secret")));
    assert_eq!(
        drain(&mut carol_rx),
        vec![
            ":irc.test 475 carol #c :Cannot join channel (+k)",
            ":irc.test 475 carol #c :Cannot join channel (+k)",
            ":irc.test 471 carol #c :Cannot join channel (+l)",
        ]
    );

    r.server.process_mode(Some(r.alice), "#c", "-l", &[]);
    assert!(r.server.join_channel(carol, "#c", Some("secret")));
}

#[test]
fn test_key_removal_needs_matching_key() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+k", &params(&["secret"]));
    let outcome = r.server.process_mode(Some(r.alice), "#c", "-k", &params(&["guess"]));
    assert!(outcome.applied.is_empty());
    let outcome = r.server.process_mode(Some(r.alice), "#c", "-k", &params(&["secret"]));
    assert_eq!(outcome.line().as_deref(), Some("-k secret"));
    assert!(r.server.channel("#c").unwrap().param('k').is_none());
}

#[test]
fn test_empty_channel_is_deleted_with_its_modes() {
    let mut r = room("");
    r.server.process_mode(Some(r.alice), "#c", "+m", &[]);
    assert!(r.server.part_channel(r.alice, "#c", "bye"));
    assert!(r.server.part_channel(r.bob, "#c", "bye"));
    assert!(r.server.channel("#c").is_none());

    // Recreated from scratch
    r.server.join_channel(r.bob, "#c", None);
    let channel = r.server.channel("#c").unwrap();
    assert!(!channel.has_mode('m'));
    assert!(channel.member(r.bob).unwrap().has('o'));
}
