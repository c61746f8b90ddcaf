mod base {
    use crate::{
        header::{
            EigrpHeader,
            HeaderFlags,
            Opcode,
        },
        verify_checksum,
        EigrpElement,
        EigrpPacket,
        Tlv,
    };
    use alloc::vec;

    #[test]
    fn test_header_round_trip() {
        let header = EigrpHeader::new(Opcode::Update, HeaderFlags::INIT, 7, 3, 100);
        let buffer = header.pack();
        assert_eq!(buffer.len(), crate::header::EIGRP_HEADER_SIZE);
        assert_eq!(EigrpHeader::unpack(&buffer).unwrap().1, header);
    }

    #[test]
    fn test_packet_checksum() {
        let packet = EigrpPacket {
            header: EigrpHeader::new(Opcode::Hello, HeaderFlags::empty(), 0, 0, 100),
            tlvs: vec![Tlv::NextMulticastSequence(42)],
        };

        let buffer = packet.pack();
        assert!(verify_checksum(&buffer));

        // A flipped byte must no longer sum to zero.
        let mut corrupted = buffer.clone();
        corrupted[10] ^= 0x40;
        assert!(!verify_checksum(&corrupted));

        let (rest, reparsed) = EigrpPacket::unpack(&buffer).unwrap();
        assert!(rest.is_empty());
        assert_eq!(reparsed.tlvs, packet.tlvs);
        assert_eq!(reparsed.header.checksum, u16::from_be_bytes([buffer[2], buffer[3]]));
    }

    #[test]
    fn test_unknown_tlv_preserved() {
        let tlv = Tlv::Unknown {
            kind: 0x00F5,
            data: vec![1, 2, 3],
        };
        let buffer = tlv.pack();
        assert_eq!(buffer[2..4], [0, 7]);
        assert_eq!(Tlv::unpack(&buffer).unwrap().1, tlv);
    }

    #[test]
    fn test_tlv_framing_violations() {
        // Length below the frame header size.
        assert!(Tlv::unpack(&[0x00, 0x01, 0x00, 0x03]).is_err());
        // Length running past the end of the buffer.
        assert!(Tlv::unpack(&[0x00, 0x01, 0x00, 0x0C, 1, 0, 1]).is_err());
    }

    #[test]
    fn test_truncated_tlv_discards_packet() {
        let mut buffer = EigrpPacket {
            header: EigrpHeader::new(Opcode::Update, HeaderFlags::empty(), 3, 0, 100),
            tlvs: vec![Tlv::NextMulticastSequence(9)],
        }
        .pack();
        // Claim more value bytes than the packet carries.
        buffer[22] = 0x00;
        buffer[23] = 0x40;
        assert!(EigrpPacket::unpack(&buffer).is_err());
    }

    #[test]
    fn test_malformed_body_degrades_to_unknown() {
        // A PARAMETER TLV with a truncated body parses as Unknown instead of
        // failing the packet.
        let buffer = [0x00, 0x01, 0x00, 0x07, 1, 0, 1];
        assert_eq!(
            Tlv::unpack(&buffer).unwrap().1,
            Tlv::Unknown {
                kind: 0x0001,
                data: vec![1, 0, 1]
            }
        );
    }
}

mod general {
    use crate::{
        general::{
            ParameterTlv,
            SequenceTlv,
            SoftwareVersionTlv,
        },
        metric::KValues,
        EigrpElement,
        Tlv,
    };
    use core::{
        net::Ipv4Addr,
        str::FromStr,
    };
    use alloc::vec;

    #[test]
    fn test_parameter_round_trip() {
        let tlv = Tlv::Parameter(ParameterTlv {
            k_values: KValues::default(),
            hold_time: 15,
        });

        let buffer = tlv.pack();
        assert_eq!(buffer, vec![0x00, 0x01, 0x00, 0x0C, 1, 0, 1, 0, 0, 0, 0, 15]);
        assert_eq!(Tlv::unpack(&buffer).unwrap().1, tlv);
    }

    #[test]
    fn test_software_version_round_trip() {
        let tlv = Tlv::SoftwareVersion(SoftwareVersionTlv {
            os_major: 0,
            os_minor: 99,
            eigrp_major: 1,
            eigrp_minor: 2,
        });

        let buffer = tlv.pack();
        assert_eq!(buffer.len(), 8);
        assert_eq!(Tlv::unpack(&buffer).unwrap().1, tlv);
    }

    #[test]
    fn test_sequence_round_trip() {
        let tlv = Tlv::Sequence(SequenceTlv {
            addresses: vec![
                Ipv4Addr::from_str("1.1.1.1").unwrap(),
                Ipv4Addr::from_str("192.168.2.200").unwrap(),
            ],
        });

        let buffer = tlv.pack();
        assert_eq!(buffer[2..4], [0, 14]);
        assert_eq!(Tlv::unpack(&buffer).unwrap().1, tlv);
    }
}

mod ipv4_internal {
    use crate::{
        ipv4::{
            destination_octets,
            Ipv4InternalTlv,
        },
        metric::EigrpMetrics,
        EigrpElement,
        Tlv,
    };
    use core::{
        net::Ipv4Addr,
        str::FromStr,
    };
    use corvus_common::Prefix;

    fn sample_metric() -> EigrpMetrics {
        EigrpMetrics {
            delay: 10,
            bandwidth: 1_000_000,
            mtu: 1500,
            hop_count: 0,
            reliability: 255,
            load: 1,
            tag: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_destination_octets() {
        assert_eq!(destination_octets(0), 1);
        assert_eq!(destination_octets(8), 1);
        assert_eq!(destination_octets(9), 2);
        assert_eq!(destination_octets(24), 3);
        assert_eq!(destination_octets(25), 4);
        assert_eq!(destination_octets(32), 4);
    }

    #[test]
    fn test_round_trip_every_octet_range() {
        for destination in ["0.0.0.0/0", "10.0.0.0/8", "172.16.0.0/12", "192.168.100.0/24", "1.1.1.1/32"] {
            let tlv = Tlv::Ipv4Internal(Ipv4InternalTlv {
                next_hop: Ipv4Addr::UNSPECIFIED,
                metric: sample_metric(),
                destination: Prefix::from_str(destination).unwrap(),
            });

            let buffer = tlv.pack();
            let (rest, reparsed) = Tlv::unpack(&buffer).unwrap();
            assert!(rest.is_empty());
            assert_eq!(reparsed, tlv, "round trip failed for {destination}");
        }
    }

    #[test]
    fn test_wire_length_by_prefix_length() {
        for (destination, expected) in [("10.0.0.0/8", 26u16), ("172.16.0.0/16", 27), ("192.168.100.0/24", 28), ("1.1.1.0/30", 29)] {
            let tlv = Tlv::Ipv4Internal(Ipv4InternalTlv {
                next_hop: Ipv4Addr::UNSPECIFIED,
                metric: sample_metric(),
                destination: Prefix::from_str(destination).unwrap(),
            });

            let buffer = tlv.pack();
            assert_eq!(u16::from_be_bytes([buffer[2], buffer[3]]), expected);
        }
    }

    #[test]
    fn test_mtu_three_byte_encoding() {
        let mut metric = sample_metric();
        metric.mtu = 0x0001_F5FF;
        let tlv = Tlv::Ipv4Internal(Ipv4InternalTlv {
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric,
            destination: Prefix::from_str("10.0.0.0/8").unwrap(),
        });

        let buffer = tlv.pack();
        // type(2) + length(2) + next hop(4) + delay(4) + bandwidth(4) = offset 16
        assert_eq!(buffer[16..19], [0x01, 0xF5, 0xFF]);
        assert_eq!(Tlv::unpack(&buffer).unwrap().1, tlv);
    }

    #[test]
    fn test_invalid_prefix_length_degrades_to_unknown() {
        let tlv = Tlv::Ipv4Internal(Ipv4InternalTlv {
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: sample_metric(),
            destination: Prefix::from_str("10.0.0.0/8").unwrap(),
        });

        let mut buffer = tlv.pack();
        buffer[24] = 60;
        assert!(matches!(Tlv::unpack(&buffer).unwrap().1, Tlv::Unknown { kind: 0x0102, .. }));
    }
}

mod metric {
    use crate::metric::{
        EigrpMetrics,
        KValues,
        EIGRP_MAX_METRIC,
    };

    fn received_metric() -> EigrpMetrics {
        EigrpMetrics {
            delay: 10,
            bandwidth: 1_000_000,
            mtu: 1500,
            hop_count: 0,
            reliability: 255,
            load: 1,
            tag: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_default_k_composite() {
        // A received vector folded across a 100 Mbit/s link with 100 us delay:
        // scaled bandwidth 10^7*256/100000 = 25600, scaled delay 20*256 = 5120.
        let total = received_metric().across_link(100_000, 10, 1500);
        assert_eq!(total.delay, 20);
        assert_eq!(total.bandwidth, 100_000);
        assert_eq!(total.hop_count, 1);
        assert_eq!(KValues::default().composite(&total), 30_720);
    }

    #[test]
    fn test_unreachable_propagation() {
        let poisoned = EigrpMetrics {
            delay: EIGRP_MAX_METRIC,
            ..received_metric()
        };
        assert_eq!(KValues::default().composite(&poisoned), EIGRP_MAX_METRIC);
        // Folding across a link must not resurrect the route.
        assert_eq!(poisoned.across_link(100_000, 10, 1500).delay, EIGRP_MAX_METRIC);
    }

    #[test]
    fn test_composite_saturation() {
        let extreme = EigrpMetrics {
            delay: EIGRP_MAX_METRIC - 1,
            bandwidth: 1,
            ..received_metric()
        };
        assert_eq!(KValues::default().composite(&extreme), EIGRP_MAX_METRIC);
    }

    #[test]
    fn test_load_and_reliability_terms() {
        let k_values = KValues {
            k1: 1,
            k2: 1,
            k3: 1,
            k4: 1,
            k5: 2,
            k6: 0,
        };
        let metric = EigrpMetrics {
            delay: 10,
            bandwidth: 10_000,
            mtu: 1500,
            hop_count: 0,
            reliability: 99,
            load: 6,
            tag: 0,
            flags: 0,
        };

        // bw = 256000, load term = 256000/250 = 1024, delay term = 2560,
        // then (256000 + 1024 + 2560) * 2 / 100 = 5191 (integer division).
        assert_eq!(k_values.composite(&metric), 5_191);
    }

    #[test]
    fn test_goodbye_and_matching() {
        let local = KValues::default();
        let mut remote = KValues::default();
        remote.k6 = 9;
        assert!(local.matches(&remote));

        remote.k2 = 1;
        assert!(!local.matches(&remote));

        let goodbye = KValues {
            k1: 0xFF,
            k2: 0xFF,
            k3: 0xFF,
            k4: 0xFF,
            k5: 0xFF,
            k6: 0,
        };
        assert!(goodbye.is_goodbye());
        assert!(!local.is_goodbye());
    }
}
