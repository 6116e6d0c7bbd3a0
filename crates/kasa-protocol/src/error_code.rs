//! Device-reported error codes for the SMART and SMART camera protocols.
//!
//! SMART devices report failures through an integer `error_code` field, both
//! on the outer response envelope and on each entry of a `multipleRequest`
//! batch. [`SmartErrorCode`] is the closed set of known codes; unknown values
//! decode to [`SmartErrorCode::InternalUnknownError`].

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// Error code returned by a SMART device.
///
/// # Example
///
/// ```
/// use kasa_protocol::SmartErrorCode;
///
/// let code = SmartErrorCode::from_code(-1501);
/// assert_eq!(code, SmartErrorCode::LoginError);
/// assert!(code.is_auth_error());
/// assert_eq!(code.code(), -1501);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum SmartErrorCode {
    Success = 0,

    // Transport errors
    SessionTimeoutError = 9999,
    MultiRequestFailedError = 1200,
    HttpTransportFailedError = 1112,
    LoginFailedError = 1111,
    HandShakeFailedError = 1100,
    TransportUnknownCredentialsError = 1003,
    TransportNotAvailableError = 1002,
    CmdCommandCancelError = 1001,
    NullTransportError = 1000,

    // Common method errors
    CommonFailedError = -1,
    UnspecificError = -1001,
    UnknownMethodError = -1002,
    JsonDecodeFailError = -1003,
    JsonEncodeFailError = -1004,
    AesDecodeFailError = -1005,
    RequestLenErrorError = -1006,
    CloudFailedError = -1007,
    ParamsError = -1008,
    InvalidPublicKeyError = -1010,
    SessionParamError = -1101,

    // Method specific errors
    QuickSetupError = -1201,
    DeviceError = -1301,
    DeviceNextEventError = -1302,
    FirmwareError = -1401,
    FirmwareVerError = -1402,
    LoginError = -1501,
    TimeError = -1601,
    TimeSysError = -1602,
    TimeSaveError = -1603,
    WirelessError = -1701,
    WirelessUnsupported = -1702,
    ScheduleError = -1801,
    ScheduleFull = -1802,
    ScheduleConflict = -1803,
    ScheduleSave = -1804,
    ScheduleIndex = -1805,
    CountdownError = -1901,
    CountdownConflict = -1902,
    CountdownSave = -1903,
    AntitheftError = -2001,
    AntitheftConflict = -2002,
    AntitheftSave = -2003,
    AccountError = -2101,
    StatError = -2201,
    StatSave = -2202,
    DstError = -2301,
    DstSave = -2302,
    VacuumBatteryLow = -3001,
    SystemError = -40101,
    InvalidArguments = -40209,

    // Camera error codes
    SessionExpired = -40401,
    BadUsername = -40411,
    HomekitLoginFail = -40412,
    DeviceBlocked = -40404,
    DeviceFactory = -40405,
    OutOfLimit = -40406,
    OtherError = -40407,
    SystemBlocked = -40408,
    NonceExpired = -40409,
    FfsNonePwd = -90000,
    TimeoutError = 40108,
    UnsupportedMethod = -40106,
    OneSecondRepeatRequest = -40109,
    InvalidNonce = -40413,
    ProtocolFormatError = -40210,
    IpConflict = -40321,
    DiagnoseTypeNotSupport = -69051,
    DiagnoseTaskFull = -69052,
    DiagnoseTaskBusy = -69053,
    DiagnoseInternalError = -69055,
    DiagnoseIdNotFound = -69056,
    DiagnoseTaskNull = -69057,
    CloudLinkDown = -69060,
    OnvifSetWrong = -69061,
    CloudNotConnected = -69062,
    NoInternet = -69063,
    ScanIpError = -69064,
    ScanGatewayError = -69065,
    ScanDnsError = -69066,
    ScanPingError = -69067,
    ScanDownloadError = -69068,
    ScanUploadError = -69069,
    CloudConnectError = -69071,
    DownloadConnectError = -69072,
    UploadConnectError = -69073,
    CloudResponseError = -69074,
    PingError = -69075,
    GatewayConnectFailed = -69076,
    HardwiredNotFound = -72101,

    // Library internal errors
    InternalUnknownError = -100_000,
    InternalQueryError = -100_001,
}

impl SmartErrorCode {
    /// Maps a wire integer to a known code.
    ///
    /// Unknown integers are logged and mapped to
    /// [`SmartErrorCode::InternalUnknownError`].
    pub fn from_code(code: i32) -> Self {
        match Self::try_from(code) {
            Ok(known) => known,
            Err(_) => {
                warn!(code, "Device returned unknown error code");
                SmartErrorCode::InternalUnknownError
            }
        }
    }

    /// Returns the wire integer for this code.
    pub fn code(self) -> i32 {
        self.into()
    }

    /// Returns `true` for codes that indicate success.
    pub fn is_success(self) -> bool {
        self == SmartErrorCode::Success
    }

    /// Returns `true` if re-establishing the session may make the request succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            SmartErrorCode::TransportNotAvailableError
                | SmartErrorCode::HttpTransportFailedError
                | SmartErrorCode::UnspecificError
                | SmartErrorCode::SessionTimeoutError
                | SmartErrorCode::SessionExpired
                | SmartErrorCode::InvalidNonce
        )
    }

    /// Returns `true` for codes that mean the credentials were rejected.
    pub fn is_auth_error(self) -> bool {
        matches!(
            self,
            SmartErrorCode::LoginError
                | SmartErrorCode::LoginFailedError
                | SmartErrorCode::AesDecodeFailError
                | SmartErrorCode::HandShakeFailedError
                | SmartErrorCode::TransportUnknownCredentialsError
                | SmartErrorCode::HomekitLoginFail
        )
    }
}

impl Serialize for SmartErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for SmartErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Ok(Self::from_code(code))
    }
}

/// Reads the `error_code` field of a response object.
///
/// A missing field is treated as success, matching devices that omit it on
/// successful responses. A value that is not an `i32` is an unknown error.
pub(crate) fn response_error_code(response: &serde_json::Value) -> SmartErrorCode {
    let Some(raw) = response.get("error_code") else {
        return SmartErrorCode::Success;
    };
    match raw.as_i64().and_then(|code| i32::try_from(code).ok()) {
        Some(code) => SmartErrorCode::from_code(code),
        None => {
            warn!(error_code = %raw, "Device returned a malformed error code");
            SmartErrorCode::InternalUnknownError
        }
    }
}
