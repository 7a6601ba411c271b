#![allow(clippy::upper_case_acronyms)]
#![allow(non_camel_case_types)]

use crate::msgs::codec::{Codec, Reader};

enum_builder! {
    /// The `ContentType` TLS protocol enum.
    @U8
    EnumName: ContentType;
    EnumVal {
        ChangeCipherSpec => 0x14,
        Alert => 0x15,
        Handshake => 0x16,
        ApplicationData => 0x17,
        Heartbeat => 0x18
    }
}

enum_builder! {
    /// The `ProtocolVersion` TLS protocol enum.
    @U16
    EnumName: ProtocolVersion;
    EnumVal {
        SSLv3 => 0x0300,
        TLSv1_0 => 0x0301,
        TLSv1_1 => 0x0302,
        TLSv1_2 => 0x0303,
        TLSv1_3 => 0x0304
    }
}

enum_builder! {
    /// The `HandshakeType` TLS protocol enum.
    @U8
    EnumName: HandshakeType;
    EnumVal {
        HelloRequest => 0x00,
        ClientHello => 0x01,
        ServerHello => 0x02,
        NewSessionTicket => 0x04,
        EndOfEarlyData => 0x05,
        HelloRetryRequest => 0x06,
        EncryptedExtensions => 0x08,
        Certificate => 0x0b,
        ServerKeyExchange => 0x0c,
        CertificateRequest => 0x0d,
        ServerHelloDone => 0x0e,
        CertificateVerify => 0x0f,
        ClientKeyExchange => 0x10,
        Finished => 0x14,
        KeyUpdate => 0x18,
        MessageHash => 0xfe
    }
}

enum_builder! {
    /// The `AlertLevel` TLS protocol enum.
    @U8
    EnumName: AlertLevel;
    EnumVal {
        Warning => 0x01,
        Fatal => 0x02
    }
}

enum_builder! {
    /// The `AlertDescription` TLS protocol enum.
    @U8
    EnumName: AlertDescription;
    EnumVal {
        CloseNotify => 0x00,
        UnexpectedMessage => 0x0a,
        BadRecordMac => 0x14,
        DecryptionFailed => 0x15,
        RecordOverflow => 0x16,
        DecompressionFailure => 0x1e,
        HandshakeFailure => 0x28,
        NoCertificate => 0x29,
        BadCertificate => 0x2a,
        UnsupportedCertificate => 0x2b,
        CertificateRevoked => 0x2c,
        CertificateExpired => 0x2d,
        CertificateUnknown => 0x2e,
        IllegalParameter => 0x2f,
        UnknownCA => 0x30,
        AccessDenied => 0x31,
        DecodeError => 0x32,
        DecryptError => 0x33,
        ExportRestriction => 0x3c,
        ProtocolVersion => 0x46,
        InsufficientSecurity => 0x47,
        InternalError => 0x50,
        InappropriateFallback => 0x56,
        UserCanceled => 0x5a,
        NoRenegotiation => 0x64,
        MissingExtension => 0x6d,
        UnsupportedExtension => 0x6e,
        CertificateUnobtainable => 0x6f,
        UnrecognisedName => 0x70,
        BadCertificateStatusResponse => 0x71,
        BadCertificateHashValue => 0x72,
        UnknownPSKIdentity => 0x73,
        CertificateRequired => 0x74,
        NoApplicationProtocol => 0x78
    }
}

enum_builder! {
    /// The `CipherSuite` TLS protocol enum.
    @U16
    EnumName: CipherSuite;
    EnumVal {
        TLS_NULL_WITH_NULL_NULL => 0x0000,
        TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => 0xc02b,
        TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => 0xc02c,
        TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => 0xc02f,
        TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 => 0xc030,
        TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => 0xcca8,
        TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256 => 0xcca9,
        TLS13_AES_128_GCM_SHA256 => 0x1301,
        TLS13_AES_256_GCM_SHA384 => 0x1302,
        TLS13_CHACHA20_POLY1305_SHA256 => 0x1303,
        TLS_EMPTY_RENEGOTIATION_INFO_SCSV => 0x00ff
    }
}

enum_builder! {
    /// The `Compression` TLS protocol enum.
    @U8
    EnumName: Compression;
    EnumVal {
        Null => 0x00,
        Deflate => 0x01,
        LSZ => 0x40
    }
}

enum_builder! {
    /// The `ExtensionType` TLS protocol enum.
    @U16
    EnumName: ExtensionType;
    EnumVal {
        ServerName => 0x0000,
        StatusRequest => 0x0005,
        EllipticCurves => 0x000a,
        ECPointFormats => 0x000b,
        SignatureAlgorithms => 0x000d,
        Heartbeat => 0x000f,
        ALProtocolNegotiation => 0x0010,
        SCT => 0x0012,
        Padding => 0x0015,
        EncryptThenMAC => 0x0016,
        ExtendedMasterSecret => 0x0017,
        SessionTicket => 0x0023,
        PreSharedKey => 0x0029,
        EarlyData => 0x002a,
        SupportedVersions => 0x002b,
        Cookie => 0x002c,
        PSKKeyExchangeModes => 0x002d,
        CertificateAuthorities => 0x002f,
        SignatureAlgorithmsCert => 0x0032,
        KeyShare => 0x0033,
        RenegotiationInfo => 0xff01
    }
}

enum_builder! {
    /// The `NamedGroup` TLS protocol enum, describing key-exchange groups.
    @U16
    EnumName: NamedGroup;
    EnumVal {
        secp256r1 => 0x0017,
        secp384r1 => 0x0018,
        secp521r1 => 0x0019,
        X25519 => 0x001d,
        X448 => 0x001e,
        FFDHE2048 => 0x0100,
        FFDHE3072 => 0x0101,
        FFDHE4096 => 0x0102,
        FFDHE6144 => 0x0103,
        FFDHE8192 => 0x0104
    }
}

enum_builder! {
    /// The `SignatureAlgorithm` enum: the left half of a `SignatureScheme`.
    @U8
    EnumName: SignatureAlgorithm;
    EnumVal {
        Anonymous => 0x00,
        RSA => 0x01,
        DSA => 0x02,
        ECDSA => 0x03,
        ED25519 => 0x07,
        ED448 => 0x08
    }
}

enum_builder! {
    /// The `SignatureScheme` TLS protocol enum.
    @U16
    EnumName: SignatureScheme;
    EnumVal {
        RSA_PKCS1_SHA1 => 0x0201,
        ECDSA_SHA1_Legacy => 0x0203,
        RSA_PKCS1_SHA256 => 0x0401,
        ECDSA_NISTP256_SHA256 => 0x0403,
        RSA_PKCS1_SHA384 => 0x0501,
        ECDSA_NISTP384_SHA384 => 0x0503,
        RSA_PKCS1_SHA512 => 0x0601,
        ECDSA_NISTP521_SHA512 => 0x0603,
        RSA_PSS_SHA256 => 0x0804,
        RSA_PSS_SHA384 => 0x0805,
        RSA_PSS_SHA512 => 0x0806,
        ED25519 => 0x0807,
        ED448 => 0x0808
    }
}

impl SignatureScheme {
    pub fn sign(&self) -> SignatureAlgorithm {
        match *self {
            Self::RSA_PKCS1_SHA1
            | Self::RSA_PKCS1_SHA256
            | Self::RSA_PKCS1_SHA384
            | Self::RSA_PKCS1_SHA512
            | Self::RSA_PSS_SHA256
            | Self::RSA_PSS_SHA384
            | Self::RSA_PSS_SHA512 => SignatureAlgorithm::RSA,
            Self::ECDSA_SHA1_Legacy
            | Self::ECDSA_NISTP256_SHA256
            | Self::ECDSA_NISTP384_SHA384
            | Self::ECDSA_NISTP521_SHA512 => SignatureAlgorithm::ECDSA,
            Self::ED25519 => SignatureAlgorithm::ED25519,
            Self::ED448 => SignatureAlgorithm::ED448,
            _ => SignatureAlgorithm::Unknown(0),
        }
    }
}

enum_builder! {
    /// The `ECPointFormat` TLS protocol enum.
    @U8
    EnumName: ECPointFormat;
    EnumVal {
        Uncompressed => 0x00,
        ANSIX962CompressedPrime => 0x01,
        ANSIX962CompressedChar2 => 0x02
    }
}

enum_builder! {
    /// The `ECCurveType` TLS protocol enum, used in ServerKeyExchange.
    @U8
    EnumName: ECCurveType;
    EnumVal {
        ExplicitPrime => 0x01,
        ExplicitChar2 => 0x02,
        NamedCurve => 0x03
    }
}

enum_builder! {
    /// The `PSKKeyExchangeMode` TLS protocol enum.
    @U8
    EnumName: PSKKeyExchangeMode;
    EnumVal {
        PSK_KE => 0x00,
        PSK_DHE_KE => 0x01
    }
}

enum_builder! {
    /// The `KeyUpdateRequest` TLS protocol enum.
    @U8
    EnumName: KeyUpdateRequest;
    EnumVal {
        UpdateNotRequested => 0x00,
        UpdateRequested => 0x01
    }
}

enum_builder! {
    /// The `HeartbeatMessageType` RFC 6520 enum.
    @U8
    EnumName: HeartbeatMessageType;
    EnumVal {
        Request => 0x01,
        Response => 0x02
    }
}

enum_builder! {
    /// The `HeartbeatMode` RFC 6520 extension body enum.
    @U8
    EnumName: HeartbeatMode;
    EnumVal {
        PeerAllowedToSend => 0x01,
        PeerNotAllowedToSend => 0x02
    }
}

enum_builder! {
    /// The `ClientCertificateType` TLS protocol enum.
    @U8
    EnumName: ClientCertificateType;
    EnumVal {
        RSASign => 0x01,
        DSSSign => 0x02,
        RSAFixedDH => 0x03,
        DSSFixedDH => 0x04,
        ECDSASign => 0x40
    }
}

enum_builder! {
    /// The TLS 1.2 `ServerNameType` enum; only HostName is defined.
    @U8
    EnumName: ServerNameType;
    EnumVal {
        HostName => 0x00
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_u8<T: Codec + PartialEq>(vals: &[T]) {
        for v in vals {
            let enc = v.get_encoding();
            assert_eq!(enc.len(), 1);
            assert_eq!(Some(v), T::read_bytes(&enc).as_ref());
        }
    }

    #[test]
    fn content_type_round_trips() {
        roundtrip_u8(&[
            ContentType::ChangeCipherSpec,
            ContentType::Alert,
            ContentType::Handshake,
            ContentType::ApplicationData,
            ContentType::Heartbeat,
            ContentType::Unknown(0x7f),
        ]);
    }

    #[test]
    fn unknown_discriminants_are_preserved() {
        assert_eq!(HandshakeType::from(0x99), HandshakeType::Unknown(0x99));
        assert_eq!(HandshakeType::Unknown(0x99).get_u8(), 0x99);
        assert_eq!(
            CipherSuite::from(0x4a4a),
            CipherSuite::Unknown(0x4a4a)
        );
    }

    #[test]
    fn signature_scheme_decomposition() {
        assert_eq!(
            SignatureScheme::RSA_PSS_SHA256.sign(),
            SignatureAlgorithm::RSA
        );
        assert_eq!(
            SignatureScheme::ECDSA_NISTP256_SHA256.sign(),
            SignatureAlgorithm::ECDSA
        );
        assert_eq!(SignatureScheme::ED25519.sign(), SignatureAlgorithm::ED25519);
    }
}
