//! End-to-end STAR transcripts against a scripted transport.
//!
//! Frames are asserted verbatim, so these tests pin the whole pipeline:
//! resource geometry, unit conversion, parameter formatting, id
//! generation and the parked-iSWAP precondition.

use std::collections::BTreeMap;

use labware::catalog::{round_bottom_plate_96, stf_tip_rack};
use labware::star_deck::{PlacementOptions, StarDeck};
use labware::{Coordinate, Tip};
use pipetting_backend::star::{LiquidOp, StarBackend, StarConfig, TipOp};
use pipetting_backend::{BackendError, MockTransport};

/// Responses for a full `setup()` of a machine with 8 channels and an
/// iSWAP, no autoload, no 96 head.
const SETUP_RESPONSES: &[&str] = &[
    "C0RFid0000rf2024-01-15\r",
    "C0QMid0001ka13600xt08ia1al0ca0\r",
    "C0MIid0002er00/00\r",
    "C0DIid0003\r",
    "R0DIid0004\r",
    "C0PGid0005\r",
];

const SETUP_FRAMES: &[&str] = &[
    "C0RFid0000\r",
    "C0QMid0001\r",
    "C0MIid0002\r",
    // Channels initialize with tip-drop positions over the trash center
    // (800.0, 311.2, 137.1).
    "C0DIid0003xp08000 08000 08000 08000 08000 08000 08000 08000\
yp3112 3022 2932 2842 2752 2662 2572 2482tp1771tz1571th2450te2450\r",
    "R0DIid0004\r",
    "C0PGid0005th2840\r",
];

fn deck_with_tip_rack() -> StarDeck {
    let mut deck = StarDeck::starlet("deck");
    let rack = stf_tip_rack(deck.tree_mut(), "tip_rack").unwrap();
    deck.assign_at_location(
        rack,
        Coordinate::new(140.9, 98.53, 49.57),
        PlacementOptions::default(),
    )
    .unwrap();
    deck
}

async fn set_up_star(
    deck: &StarDeck,
    extra_responses: &[&str],
) -> StarBackend<MockTransport> {
    let mut mock = MockTransport::new();
    for resp in SETUP_RESPONSES.iter().chain(extra_responses) {
        mock.push_response(resp.as_bytes().to_vec());
    }
    let mut star = StarBackend::new(mock, StarConfig::default());
    star.setup(deck).await.unwrap();
    star
}

#[tokio::test]
async fn setup_transcript_matches_golden_sequence() {
    let deck = deck_with_tip_rack();
    let star = set_up_star(&deck, &[]).await;
    assert_eq!(star_sent(&star), SETUP_FRAMES);
    assert_eq!(star.num_channels(), 8);
    assert!(star.iswap_parked());
}

fn star_sent(star: &StarBackend<MockTransport>) -> Vec<String> {
    star.transport().sent_strings()
}

#[tokio::test]
async fn pick_up_tips_from_rack_spot_a1() {
    let deck = deck_with_tip_rack();
    let mut star = set_up_star(
        &deck,
        &["C0TTid0006\r", "C0TPid0007er00/00\r"],
    )
    .await;

    let rack = deck.get_resource("tip_rack").unwrap();
    let a1 = deck.tree().item(rack, "A1").unwrap();
    let op = TipOp {
        spot: a1,
        offset: Coordinate::zero(),
        tip: Tip::standard_volume_with_filter(),
    };
    star.pick_up_tips(deck.tree(), &[op], &[0]).await.unwrap();

    let sent = star_sent(&star);
    // First use of this tip type registers it.
    assert_eq!(sent[6], "C0TTid0006tt00tf1tl0599tv03600tg1tu0\r");
    // A1 center is at (152.6, 171.33); the spot's z is -0.93 and the
    // standard volume tip is 59.9 mm long with an 8 mm fitting depth.
    assert_eq!(
        sent[7],
        "C0TPid0007xp01526 00000yp1713 0000tm10tt00tp0590tz0510th2450td0\r"
    );
}

#[tokio::test]
async fn unparked_iswap_is_parked_before_channel_work() {
    let deck = deck_with_tip_rack();
    let mut star = set_up_star(
        &deck,
        &[
            "R0DIid0006\r",
            "C0PGid0007\r",
            "C0TTid0008\r",
            "C0TPid0009er00/00\r",
        ],
    )
    .await;

    // Re-initializing the iSWAP leaves it unparked.
    star.initialize_iswap().await.unwrap();
    assert!(!star.iswap_parked());

    let rack = deck.get_resource("tip_rack").unwrap();
    let a1 = deck.tree().item(rack, "A1").unwrap();
    let op = TipOp {
        spot: a1,
        offset: Coordinate::zero(),
        tip: Tip::standard_volume_with_filter(),
    };
    star.pick_up_tips(deck.tree(), &[op], &[0]).await.unwrap();
    assert!(star.iswap_parked());

    let sent = star_sent(&star);
    let golden: Vec<String> = SETUP_FRAMES
        .iter()
        .map(|s| s.to_string())
        .chain([
            "R0DIid0006\r".to_string(),
            // The park command goes out before the tip pickup.
            "C0PGid0007th2840\r".to_string(),
            "C0TTid0008tt00tf1tl0599tv03600tg1tu0\r".to_string(),
            "C0TPid0009xp01526 00000yp1713 0000tm10tt00tp0590tz0510th2450td0\r".to_string(),
        ])
        .collect();
    assert_eq!(sent, golden);
}

#[tokio::test]
async fn channelized_firmware_errors_surface_per_channel() {
    let deck = deck_with_tip_rack();
    let mut star = set_up_star(
        &deck,
        &["C0TTid0006\r", "C0TPid0007er99/00 P1er08/76\r"],
    )
    .await;

    let rack = deck.get_resource("tip_rack").unwrap();
    let a1 = deck.tree().item(rack, "A1").unwrap();
    let op = TipOp {
        spot: a1,
        offset: Coordinate::zero(),
        tip: Tip::standard_volume_with_filter(),
    };
    let err = star
        .pick_up_tips(deck.tree(), &[op], &[0])
        .await
        .unwrap_err();
    match err {
        BackendError::Channelized(channels) => {
            assert_eq!(channels.len(), 1);
            assert!(channels.contains_key(&0));
        }
        other => panic!("expected channelized error, got {other:?}"),
    }
}

#[tokio::test]
async fn y_positioning_round_trip() {
    let deck = deck_with_tip_rack();
    let mut star = set_up_star(
        &deck,
        &[
            "C0RYid0006ry0690 0600 0510 0420 0330 0240 0150 0060\r",
            "C0JYid0007\r",
        ],
    )
    .await;

    let mut requested = BTreeMap::new();
    requested.insert(3, 200.0);
    star.position_channels_in_y_direction(&requested, true)
        .await
        .unwrap();

    let sent = star_sent(&star);
    assert_eq!(sent[6], "C0RYid0006\r");
    assert_eq!(
        sent[7],
        "C0JYid0007yp2270 2180 2090 2000 0330 0240 0150 0060\r"
    );
}

#[tokio::test]
async fn y_positioning_off_limits_sends_no_move() {
    let deck = deck_with_tip_rack();
    let mut star = set_up_star(
        &deck,
        &["C0RYid0006ry0690 0600 0510 0420 0330 0240 0150 0060\r"],
    )
    .await;

    let mut requested = BTreeMap::new();
    requested.insert(0, 660.0);
    let err = star
        .position_channels_in_y_direction(&requested, true)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidArgument(_)));
    // Only the position query went out, no JY.
    assert_eq!(star_sent(&star).len(), 7);
}

#[tokio::test]
async fn aspirate_and_dispense_transcripts() {
    let mut deck = deck_with_tip_rack();
    let plate = round_bottom_plate_96(deck.tree_mut(), "plate").unwrap();
    deck.assign_at_location(
        plate,
        Coordinate::new(500.0, 199.145, 100.0),
        PlacementOptions::default(),
    )
    .unwrap();

    let mut star = set_up_star(
        &deck,
        &["C0ASid0006er00/00\r", "C0DSid0007er00/00\r"],
    )
    .await;

    let a1 = deck.tree().item(deck.get_resource("plate").unwrap(), "A1").unwrap();
    let tips = [Tip::standard_volume_with_filter()];

    // 100 uL of water, surface mode: the standard-volume water class
    // corrects the volume to 104.8 uL.
    let asp = LiquidOp::new(a1, 100.0);
    star.aspirate(deck.tree(), &[asp], &[0], &tips).await.unwrap();

    // 50 uL back out, empty-tip mode (forces dispense mode 4).
    let mut disp = LiquidOp::new(a1, 50.0);
    disp.empty = true;
    star.dispense(deck.tree(), &[disp], &[0], &tips).await.unwrap();

    let sent = star_sent(&star);
    assert_eq!(
        sent[6],
        "C0ASid0006at0tm10xp05142 00000yp2730 0000th2450te2450lp1180ch000zl1040zx1030\
av01048as1000ta000ba00000oa000lm0de0020wt10mv00000mc00mp000ms1000\r"
    );
    assert_eq!(
        sent[7],
        "C0DSid0007dm4tm10xp05142 00000yp2730 0000th2450te2450lp1180zl1040zx1030\
dv00529ds1200ss0050rv000ta000ba00000lm0de0020wt05mv00000mc00ms1000\r"
    );
}

#[tokio::test]
async fn operations_before_setup_are_rejected() {
    let deck = deck_with_tip_rack();
    let mut star = StarBackend::new(MockTransport::new(), StarConfig::default());
    let rack = deck.get_resource("tip_rack").unwrap();
    let a1 = deck.tree().item(rack, "A1").unwrap();
    let op = TipOp {
        spot: a1,
        offset: Coordinate::zero(),
        tip: Tip::standard_volume_with_filter(),
    };
    let err = star
        .pick_up_tips(deck.tree(), &[op], &[0])
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotReady));
}
