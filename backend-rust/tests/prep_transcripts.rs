//! End-to-end Prep transcripts against a scripted transport.
//!
//! The short frames (park, deck light, safe-z) are asserted against
//! recorded instrument traffic byte for byte; the long pipetting frames
//! are decoded back through the codec and checked structurally.

use labware::catalog::{round_bottom_plate_96, stf_tip_rack};
use labware::{Coordinate, Deck, Tip};
use pipetting_backend::prep::{
    PrepBackend, PrepLiquidOp, PrepTipOp, DESTINATION_ADDRESS, SOURCE_ADDRESS,
};
use pipetting_backend::{BackendError, MockTransport};
use prep_wire::{
    Fragment, FragmentValue, HarpPacket, HoiAction, HoiPacket2, IpPacket, IpProtocol,
};

/// A success response: CommandResponse echoing the command id with a
/// zero HcResult.
fn response_for(command_id: u16) -> Vec<u8> {
    let hoi = HoiPacket2 {
        interface_id: 1,
        action: HoiAction::CommandResponse as u8,
        action_id: command_id,
        version: 0,
        fragments: vec![Fragment {
            value: FragmentValue::HcResult(0),
        }],
    };
    let harp = HarpPacket::command_request(DESTINATION_ADDRESS, SOURCE_ADDRESS, 9, hoi.encode());
    IpPacket::new(IpProtocol::Harp2, (3, 0), harp.encode())
        .encode()
        .to_vec()
}

async fn set_up_prep(extra_responses: &[u16]) -> PrepBackend<MockTransport> {
    let mut mock = MockTransport::new();
    mock.push_response(response_for(1)); // initialize
    for &id in extra_responses {
        mock.push_response(response_for(id));
    }
    let mut prep = PrepBackend::new(mock);
    prep.setup(false).await.unwrap();
    prep
}

fn sent_hex(prep: &PrepBackend<MockTransport>, index: usize) -> String {
    hex::encode(&prep.transport().sent[index])
}

/// The deck the recorded traffic was captured on: an STF rack at spot 7
/// and a round-well plate at spot 3.
fn prep_deck() -> (Deck, labware::NodeId, labware::NodeId) {
    let mut deck = Deck::new("deck", 392.0, 250.0, 140.0);
    let rack = stf_tip_rack(deck.tree_mut(), "tr").unwrap();
    deck.assign_child(rack, Coordinate::new(140.9, 98.53, 49.57), false)
        .unwrap();
    let plate = round_bottom_plate_96(deck.tree_mut(), "plate").unwrap();
    deck.assign_child(plate, Coordinate::new(1.55, 76.58, 0.0), false)
        .unwrap();
    (deck, rack, plate)
}

#[tokio::test]
async fn park_frame_matches_recorded_traffic() {
    let mut prep = set_up_prep(&[3]).await;
    prep.park().await.unwrap();
    assert_eq!(
        sent_hex(&prep, 1),
        "200006300000020004000400010001000015020002131c0000000000010303000000"
    );
}

#[tokio::test]
async fn deck_light_frame_and_round_trip() {
    let mut prep = set_up_prep(&[25]).await;
    prep.set_deck_light(255, 0, 0, 0).await.unwrap();

    let expected = concat!(
        "380006300000020005000200010001000015020002133400000000",
        "00010319000004",
        "04010200ff00",
        "040102000000",
        "040102000000",
        "040102000000",
    );
    assert_eq!(sent_hex(&prep, 1), expected);

    // The frame survives its own codec: one IpPacket, four UInt8
    // fragments with the requested color.
    let sent = &prep.transport().sent[1];
    let ip = IpPacket::decode(sent).unwrap();
    let harp = HarpPacket::decode(&ip.payload).unwrap();
    let hoi = HoiPacket2::decode(&harp.payload).unwrap();
    assert_eq!(hoi.action_id, 25);
    let values: Vec<u8> = hoi
        .fragments
        .iter()
        .filter_map(|f| match f.value {
            FragmentValue::U8(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(values, [255, 0, 0, 0]);
}

#[tokio::test]
async fn move_z_up_to_safe_frame_matches_recorded_traffic() {
    let mut prep = set_up_prep(&[28]).await;
    // Channel 1 is the front channel, channel 0 the rear one.
    prep.move_z_up_to_safe(&[1, 0]).await.unwrap();
    assert_eq!(
        sent_hex(&prep, 1),
        concat!(
            "2c000630000002000700060000e001000010020002132800000000",
            "0001031c000001",
            "23000800",
            "0100000002000000",
        )
    );
}

#[tokio::test]
async fn pick_up_tips_builds_recorded_geometry() {
    let (deck, rack, _) = prep_deck();
    let mut prep = set_up_prep(&[9]).await;

    let tip = Tip::standard_volume_with_filter();
    let ops = vec![
        PrepTipOp {
            spot: deck.tree().item(rack, "C1").unwrap(),
            offset: Coordinate::zero(),
            tip: tip.clone(),
        },
        PrepTipOp {
            spot: deck.tree().item(rack, "D1").unwrap(),
            offset: Coordinate::zero(),
            tip: tip.clone(),
        },
    ];
    prep.pick_up_tips(deck.tree(), &ops, &[0, 1], 123.87)
        .await
        .unwrap();

    let sent = &prep.transport().sent[1];
    let ip = IpPacket::decode(sent).unwrap();
    let harp = HarpPacket::decode(&ip.payload).unwrap();
    let hoi = HoiPacket2::decode(&harp.payload).unwrap();
    assert_eq!(hoi.action_id, 9);
    assert_eq!(hoi.fragments.len(), 7);

    let FragmentValue::StructureArray(positions) = &hoi.fragments[0].value else {
        panic!("expected tip position array");
    };
    assert_eq!(positions.len(), 2);
    // C1 on the rear channel: center (152.6, 153.33), tip top at
    // -0.93 + 59.9 = 58.97, seek 12 above.
    assert_eq!(positions[0][1].value, FragmentValue::Enum(2));
    assert_eq!(positions[0][2].value, FragmentValue::F32(152.6));
    assert_eq!(positions[0][3].value, FragmentValue::F32(153.33));
    assert_eq!(positions[0][4].value, FragmentValue::F32(58.97));
    assert_eq!(positions[0][5].value, FragmentValue::F32(70.97));
    // D1 on the front channel, one 9 mm pitch forward.
    assert_eq!(positions[1][1].value, FragmentValue::Enum(1));
    assert_eq!(positions[1][3].value, FragmentValue::F32(144.33));

    assert_eq!(hoi.fragments[1].value, FragmentValue::F32(123.87));
    // Tip definition: 360 uL, 51.9 mm above the fitting, filtered.
    let FragmentValue::Structure(tip_def) = &hoi.fragments[3].value else {
        panic!("expected tip definition structure");
    };
    assert_eq!(tip_def[1].value, FragmentValue::F32(360.0));
    assert_eq!(tip_def[2].value, FragmentValue::F32(51.9));
    assert_eq!(tip_def[4].value, FragmentValue::Bool(true));
}

#[tokio::test]
async fn aspirate_builds_recorded_geometry() {
    let (deck, _, plate) = prep_deck();
    let mut prep = set_up_prep(&[1]).await;

    let op = PrepLiquidOp {
        container: deck.tree().item(plate, "A1").unwrap(),
        offset: Coordinate::zero(),
        volume: 100.0,
        flow_rate: None,
        blow_out_air_volume: None,
    };
    prep.aspirate(deck.tree(), &[op], &[0], 96.97).await.unwrap();

    let sent = &prep.transport().sent[1];
    let ip = IpPacket::decode(sent).unwrap();
    let harp = HarpPacket::decode(&ip.payload).unwrap();
    let hoi = HoiPacket2::decode(&harp.payload).unwrap();
    assert_eq!(hoi.action_id, 1);

    let FragmentValue::StructureArray(bundles) = &hoi.fragments[0].value else {
        panic!("expected aspirate parameter array");
    };
    assert_eq!(bundles.len(), 1);
    let bundle = &bundles[0];
    assert_eq!(bundle[1].value, FragmentValue::Enum(2));
    let FragmentValue::Structure(aspirate) = &bundle[2].value else {
        panic!("expected aspirate structure");
    };
    // Well A1 center, cavity bottom anchor.
    assert_eq!(aspirate[1].value, FragmentValue::F32(15.775));
    assert_eq!(aspirate[2].value, FragmentValue::F32(150.435));
    let FragmentValue::Structure(common) = &bundle[3].value else {
        panic!("expected common structure");
    };
    assert_eq!(common[5].value, FragmentValue::F32(100.0)); // volume
    assert_eq!(common[8].value, FragmentValue::F32(3.175)); // well radius
}

#[tokio::test]
async fn square_wells_are_rejected_for_aspirate() {
    let mut deck = Deck::new("deck", 392.0, 250.0, 140.0);
    let square = deck.tree_mut().add(
        labware::ResourceInit::new("square", 8.0, 6.0, 10.0)
            .data(labware::ResourceData::Well(labware::WellState::new(1.0, 100.0))),
    );
    deck.assign_child(square, Coordinate::new(10.0, 10.0, 0.0), false)
        .unwrap();

    let mut prep = set_up_prep(&[]).await;
    let op = PrepLiquidOp {
        container: square,
        offset: Coordinate::zero(),
        volume: 10.0,
        flow_rate: None,
        blow_out_air_volume: None,
    };
    let err = prep
        .aspirate(deck.tree(), &[op], &[0], 96.97)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidArgument(_)));
    // Nothing beyond the initialize frame went out.
    assert_eq!(prep.transport().sent.len(), 1);
}

#[tokio::test]
async fn storage_round_trip() {
    let mut mock = MockTransport::new();
    mock.push_response(response_for(1)); // initialize
    mock.push_response(response_for(15)); // write
    // Read answers with the stored bytes after the result fragment.
    let read_response = {
        let hoi = HoiPacket2 {
            interface_id: 1,
            action: HoiAction::CommandResponse as u8,
            action_id: 14,
            version: 0,
            fragments: vec![
                Fragment {
                    value: FragmentValue::HcResult(0),
                },
                Fragment::u8_array(vec![0xDE, 0xAD, 0xBE, 0xEF]),
            ],
        };
        let harp =
            HarpPacket::command_request(DESTINATION_ADDRESS, SOURCE_ADDRESS, 3, hoi.encode());
        IpPacket::new(IpProtocol::Harp2, (3, 0), harp.encode())
            .encode()
            .to_vec()
    };
    mock.push_response(read_response);

    let mut prep = PrepBackend::new(mock);
    prep.setup(false).await.unwrap();
    prep.write_storage(16, vec![0xDE, 0xAD, 0xBE, 0xEF])
        .await
        .unwrap();
    let data = prep.read_storage(16, 4).await.unwrap();
    assert_eq!(data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
}
