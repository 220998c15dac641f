//! HcResult: the firmware's u16 result codes.
//!
//! Groups by high byte: 0x00xx generic, 0x01xx kernel, 0x02xx network,
//! 0x03xx transport ports, 0x04xx com-link. A response whose first
//! fragment is a nonzero `HcResult` failed; codes missing from this table
//! still surface, as a protocol error carrying the raw number.

use crate::fragment::{Fragment, FragmentValue};
use crate::PrepWireError;

macro_rules! hc_result_codes {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// Known firmware result codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u16)]
        pub enum HcResult {
            $($name = $code),+
        }

        impl HcResult {
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$name),)+
                    _ => None,
                }
            }
        }
    };
}

hc_result_codes! {
    Success = 0x0000,
    GenericError = 0x0001,
    GenericNotReady = 0x0002,
    GenericNullParameter = 0x0003,
    GenericCalledByInitHandler = 0x0004,
    GenericInvalidData = 0x0005,
    GenericOutOfMemory = 0x0006,
    GenericWriteFault = 0x0007,
    GenericReadFault = 0x0008,
    GenericBufferOverflow = 0x0009,
    GenericNotInitialized = 0x000A,
    GenericAlreadyInitialized = 0x000B,
    GenericWaitAborted = 0x000C,
    GenericTimeOut = 0x000D,
    GenericMissingCallBack = 0x000E,
    GenericInvalidHandle = 0x000F,
    GenericNotSupported = 0x0010,
    GenericInvalidParameter = 0x0011,
    GenericNotImplemented = 0x0012,
    GenericBadCrc = 0x0013,
    GenericFlashNotBlank = 0x0014,
    GenericMultipleErrorsReported = 0x0015,
    GenericCoordinatedCommandTimeout = 0x0016,
    GenericAccessDenied = 0x0017,
    GenericBusy = 0x0019,
    GenericMethodObsolete = 0x001A,
    GenericNotConfigured = 0x001B,
    GenericNotCalibrated = 0x001C,
    GenericOptionalFunctionalityNotPresent = 0x001D,
    GenericResumeFromInvalidState = 0x001E,
    GenericAbortFromInvalidState = 0x001F,
    GenericActionAborted = 0x0020,
    GenericPauseFromInvalidState = 0x0021,
    GenericPaused = 0x0022,
    GenericSuspended = 0x0023,
    GenericExitSuspendFromInvalidState = 0x0024,
    KernelMutexTimeout = 0x0101,
    KernelSemaphoreTimeout = 0x0102,
    KernelEventTimeout = 0x0103,
    KernelNoMutex = 0x0104,
    KernelMutexNotOwned = 0x0105,
    KernelNoWaitingTask = 0x0106,
    KernelInvalidTask = 0x0107,
    KernelNoTaskControlBlock = 0x0108,
    NetworkUndefinedProtocol = 0x0201,
    NetworkNoDestination = 0x0202,
    NetworkRegistrationError = 0x0203,
    NetworkNotRegistered = 0x0204,
    NetworkBusy = 0x0205,
    NetworkInvalidDispatchId = 0x0206,
    NetworkInvalidMessage = 0x0207,
    NetworkUnsupportedParameter = 0x0208,
    NetworkCommandCompleteNotValid = 0x0209,
    NetworkInvalidMessageParameter = 0x020A,
    NetworkIncompatibleProtocolVersion = 0x020B,
    NetworkInvalidNodeId = 0x020C,
    NetworkInvalidModuleId = 0x020D,
    NetworkInvalidInterfaceId = 0x020E,
    NetworkInvalidAction = 0x020F,
    NetworkProxySendAttemptFailed = 0x0210,
    NetworkRegistrationFailedDuplicateAddress = 0x0211,
    NetworkUnableToProperlyFillOutResults = 0x0212,
    NetworkDuplicateEventRegistration = 0x0213,
    NetworkEventRegistrationExceedsMaximumAllowedSubscribers = 0x0214,
    NetworkMaximumNodeToNodeEventRegistrationsExceeded = 0x0215,
    NetworkMaximumNodeToNodeEventHandlerRegistrationsExceeded = 0x0216,
    NetworkUnsupportedHarpPayloadProtocol = 0x0217,
    NetworkUnableToSubscribeInvalidEvent = 0x0218,
    NetworkGlobalObjectDefinedButNotInstantiated = 0x0219,
    NetworkNodeGlobalObjectDefinedButNotInstantiated = 0x021A,
    NetworkProxyRequestValidationFailed = 0x021B,
    XPortSlOsPortNotInstalled = 0x0301,
    XPortSlIpTaskPriorityNotSet = 0x0302,
    XPortSlTimerTaskPriorityNotSet = 0x0303,
    XPortSlDriverNotSet = 0x0304,
    XPortSlIpAddressNotSet = 0x0305,
    XPortSlNetMaskNotSet = 0x0306,
    XPortSlCmxInitFailure = 0x0307,
    XPortSlMacAddressNotSet = 0x0308,
    XPortSlHostNameTooShort = 0x0309,
    XPortSlHostNameTooLong = 0x030A,
    XPortSlHostNameInvalidChars = 0x030B,
    XPortNxpLpc2xxxCanInvalidChannel = 0x0320,
    XPortNxpLpc2xxxCanInvalidGroup = 0x0321,
    XPortNxpLpc2xxxCanBitRate = 0x0322,
    XPortNxpLpc2xxxCanRxInterruptInstall = 0x0323,
    XPortNxpLpc2xxxCanRxInterruptRemove = 0x0324,
    XPortNxpLpc2xxxCanTxInterruptInstall = 0x0325,
    XPortNxpLpc2xxxCanTxInterruptRemove = 0x0326,
    XPortNxpLpc2xxxCanTxInvalidLength = 0x0327,
    XPortNxpLpc2xxxCanTxBusy = 0x0328,
    XPortArcNetAlreadyConfigured = 0x0329,
    XPortArcNetNotConfigured = 0x032A,
    XPortArcNetInterruptInstallFailed = 0x032B,
    XPortArcNetTxNoAck = 0x032C,
    XPortArcNetDiagnosticTestFailed = 0x032D,
    XPortArcNetNodeIdTestFailed = 0x032E,
    XPortArcNetInvalidNodeId = 0x032F,
    XPortArcNetTxNotAvailable = 0x0330,
    XPortArcNetInvalidDataRate = 0x0331,
    XPortArcNetInvalidPacketLength = 0x0332,
    XPortArcNetSingleNodeNetwork = 0x0333,
    XPortArcNetNoResponseToFbe = 0x0334,
    XPortProtocolMismatch = 0x0341,
    XPortPacketRouterNotRegistered = 0x0342,
    XPortCouldNotStartPacketRouterRxThread = 0x0343,
    XPortPacketRouterAlreadyRegistered = 0x0344,
    XPortNoPacketToProcess = 0x0345,
    XPortWireProtocolNotRegistered = 0x0346,
    XPortWireProtocolAlreadyRegistered = 0x0347,
    XPortWireProtocolRegistrationSpaceFull = 0x0348,
    XPortPayloadProtocolNotRegistered = 0x0349,
    XPortPayloadProtocolAlreadyRegistered = 0x034A,
    XPortPayloadRegistrationSpaceFull = 0x034B,
    XPortAddressNotSet = 0x034C,
    XPortAttemptToSendToSelf = 0x034D,
    XPortTxTimeout = 0x034E,
    XPortRxDuplicateFrame = 0x034F,
    XPortCanWp0VersionConflict = 0x0360,
    XPortCanExcessivePacketSize = 0x0361,
    XPortCanWp0AckHasNoMatchingPacket = 0x0362,
    XPortCanWp0WrapperOnlyOneAddressSupported = 0x0363,
    XPortCanWp0ErrorStartRefused = 0x0364,
    XPortCanWp0ErrorBufferOverrun = 0x0365,
    XPortCanWp0InvalidFrame = 0x0366,
    XPortCanWp0StrayDataFrame = 0x0367,
    XPortCanWp0ShortMessage = 0x0368,
    XPortCanWp0LongMessage = 0x0369,
    XPortCanWp0UnknownError = 0x036A,
    XPortCanWp0NoResponseFromDestination = 0x036B,
    XPortCanWp0SendError = 0x036C,
    XPortCanWbzUnknownFrame = 0x036D,
    XPortCanWbzUnsolicitedRemoteFrame = 0x036E,
    XPortCanWbzUnsolicitedDataFrame = 0x036F,
    XPortCanWbzWrapperOnlyOneAddressSupported = 0x0370,
    XPortCanWp0LastMessageFailed = 0x0371,
    XPortIpStackConfigurationFailure = 0x0380,
    XPortIpStackNotConfigured = 0x0381,
    XPortSocketCreationFailure = 0x0382,
    XPortSocketConfigFailure = 0x0383,
    XPortSocketBindFailure = 0x0384,
    XPortIpTaskAlreadyStarted = 0x0385,
    XPortIpTaskNotStarted = 0x0386,
    XPortTcpListenFailure = 0x0387,
    XPortTcpClientAlreadyConnected = 0x0388,
    XPortTcpClientNotConnected = 0x0389,
    XPortTcpConnectionFailure = 0x038A,
    XPortTcpCloseFailure = 0x038B,
    XPortTcpSendError = 0x038C,
    XPortUdpSendError = 0x038D,
    XPortMalformedDiscoveryRequest = 0x038E,
    XPortIpDhcpFailed = 0x038F,
    XPortIpStaticAddressConfigFailed = 0x0390,
    XPortArcNetBufferOverrun = 0x03A0,
    XPortArcNetVersionConflict = 0x03A1,
    XPortArcNetInvalidFrameType = 0x03A2,
    XPortArcNetInvalidFrame = 0x03A3,
    XPortArcNetUnknownError = 0x03A4,
    XPortArcNetAckHasNoMatchingPacket = 0x03A5,
    XPortArcNetInvalidMessageSize = 0x03A6,
    XPortArcNetLastMessageFailed = 0x03A7,
    XPortArcNetWp0RefusedSyn = 0x03A8,
    XPortArcNetWp0MessageTooShort = 0x03A9,
    XPortArcNetWp0MessageTooLong = 0x03AA,
    XPortArcNetWp0InvalidSequenceNumber = 0x03AB,
    XPortArcNetWp0NoResponseFromDestination = 0x03AC,
    XPortRs232PppTimeout = 0x03C0,
    ComLinkReferToInnerException = 0x0400,
    ComLinkNotConnected = 0x0401,
    ComLinkTcpConnectionFailed = 0x0402,
    ComLinkFailedToCloseConnectionProperly = 0x0403,
    ComLinkInvalidProtocolVersion = 0x0404,
    ComLinkUnsupportedOptionsDetectedByServer = 0x0405,
    ComLinkNodeIdNegotiationFailure = 0x0406,
    ComLinkConnectionIntentError = 0x0407,
    ComLinkUnableToConfigureKeepAlive = 0x0408,
    ComLinkFailedToSendConnectionPacket = 0x0409,
    ComLinkInvalidRegistrationAction = 0x040A,
    ComLinkUnexpectedRequestedHarpAddressReturned = 0x040B,
    ComLinkHarpAddressRegistrationFailed = 0x040C,
    ComLinkHarpAddressDeregistrationFailed = 0x040D,
    ComLinkIdentificationNotImplemented = 0x040E,
    ComLinkIdentificationNotSupported = 0x040F,
    ComLinkFailedToSendIdentificationRequest = 0x0410,
    ComLinkNoResponseFromInstrumentRegistrationServer = 0x0411,
    ComLinkNoRootObjectFound = 0x0412,
    ComLinkEthernetObjectNotFound = 0x0413,
    ComLinkMethodNotFound = 0x0414,
    ComLinkProtocolActionConversionFailed = 0x0415,
    ComLinkTimeout = 0x0416,
    ComLinkUnableToSendOrReceive = 0x0417,
    ComLinkTransportTransportableIntroductionFailure = 0x0418,
    ComLinkHarpHarpableIntroductionFailure = 0x0419,
    ComLinkDownloadException = 0x041A,
    ComLinkSizeOfReturnParametersNotValid = 0x041B,
    ComLinkRestrictedMethod = 0x041C,
    ComLinkInvalidNumberOfStructureParametersFromNetworkLayer = 0x041D,
    ComLinkInvalidTypeInStructureFromNetworkLayer = 0x041E,
    ComLinkRs232ConnectionFailed = 0x041F,
    ComLinkRs232InvalidPort = 0x0420,
    ComLinkLoggingCannotBeConfiguredWhileConnectedOrConnecting = 0x0421,
    ComLinkThreadAbortExceptionDetected = 0x0422,
    ComLinkUnableToSend = 0x0423,
    ComLinkUnableToReceive = 0x0424,
    ComLinkConnectionRequiredToProceed = 0x0425,
    ComLinkTooMuchDataToSend = 0x0426,
    ComLinkCanConfigurationFailure = 0x0427,
    ComLinkUnableToRetrieveListOfModules = 0x0428,
    ComLinkTcpConnectionFailedConnectionRefused = 0x0429,
    ComLinkTcpConnectionFailedHostUnreachable = 0x042A,
    ComLinkTcpConnectionFailedHostNotFound = 0x042B,
    ComLinkTcpConnectionFailedTimedOut = 0x042C,
    ComLinkTcpConnectionFailedIsConnected = 0x042D,
    ComLinkConnectionClosedWithOutstandingRequest = 0x042E,
    ComLinkNotConfigured = 0x042F,
    ComLinkRs232MultiFailedToConnect = 0x0430,
    ComLinkAttemptToCallNonStatusRequestMethodWithMonitorConnection = 0x0431,
    ComLinkPauseResumeFunctionalityNotSupported = 0x0432,
    ComLinkFailedToCreateDeviceHandleForUsbDevice = 0x0433,
    ComLinkUsbDeviceNotAvailable = 0x0434,
    ComLinkUsbConnectionFailed = 0x0435,
    ComLinkUsbConnectionLost = 0x0436,
    ComLinkBonaduzError = 0x0437,
    ComLinkUsbMultiFailedToConnect = 0x0438,
    GenericMultipleWarningsReported = 0x8018,
}

/// Subsystem that produced a result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HcResultGroup {
    Generic,
    Kernel,
    Network,
    XPort,
    ComLink,
    Other,
}

impl HcResult {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn group(self) -> HcResultGroup {
        match self.code() >> 8 {
            0x00 => HcResultGroup::Generic,
            0x01 => HcResultGroup::Kernel,
            0x02 => HcResultGroup::Network,
            0x03 => HcResultGroup::XPort,
            0x04 => HcResultGroup::ComLink,
            _ => HcResultGroup::Other,
        }
    }

    /// Transient: the instrument is busy and the command may simply be
    /// retried.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::GenericBusy | Self::NetworkBusy)
    }
}

/// Inspect a response's fragments for a leading `HcResult`. Zero means
/// success; anything else is the command's failure code.
pub fn check_result_fragment(fragments: &[Fragment]) -> Result<(), PrepWireError> {
    let Some(first) = fragments.first() else {
        return Ok(());
    };
    let FragmentValue::HcResult(code) = first.value else {
        return Ok(());
    };
    if code == 0 {
        return Ok(());
    }
    Err(PrepWireError::CommandFailed {
        code,
        known: HcResult::from_code(code),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(HcResult::from_code(0x0019), Some(HcResult::GenericBusy));
        assert_eq!(HcResult::from_code(0x0437), Some(HcResult::ComLinkBonaduzError));
        assert_eq!(HcResult::from_code(0x0101), Some(HcResult::KernelMutexTimeout));
        assert_eq!(HcResult::from_code(0xEEEE), None);
    }

    #[test]
    fn groups_by_high_byte() {
        assert_eq!(HcResult::GenericTimeOut.group(), HcResultGroup::Generic);
        assert_eq!(HcResult::KernelNoMutex.group(), HcResultGroup::Kernel);
        assert_eq!(HcResult::NetworkBusy.group(), HcResultGroup::Network);
        assert_eq!(HcResult::XPortTxTimeout.group(), HcResultGroup::XPort);
        assert_eq!(HcResult::ComLinkTimeout.group(), HcResultGroup::ComLink);
    }

    #[test]
    fn result_fragment_checks() {
        assert!(check_result_fragment(&[]).is_ok());
        assert!(check_result_fragment(&[Fragment {
            value: FragmentValue::HcResult(0),
        }])
        .is_ok());

        let err = check_result_fragment(&[Fragment {
            value: FragmentValue::HcResult(0x0019),
        }])
        .unwrap_err();
        match err {
            PrepWireError::CommandFailed { code, known } => {
                assert_eq!(code, 0x0019);
                assert_eq!(known, Some(HcResult::GenericBusy));
                assert!(known.map(HcResult::is_busy).unwrap_or(false));
            }
            _ => panic!("expected CommandFailed"),
        }

        let err = check_result_fragment(&[Fragment {
            value: FragmentValue::HcResult(0x7777),
        }])
        .unwrap_err();
        assert!(matches!(
            err,
            PrepWireError::CommandFailed { code: 0x7777, known: None }
        ));
    }
}
