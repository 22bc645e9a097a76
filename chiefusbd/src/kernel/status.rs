use std::fmt;

/// NT-style status code. Any non-negative value is a success value,
/// anything negative is an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Self = Status(0);
    pub const PENDING: Self = Status(0x0000_0103);

    pub const UNSUCCESSFUL: Self = Status(0xC000_0001_u32 as i32);
    pub const NOT_IMPLEMENTED: Self = Status(0xC000_0002_u32 as i32);
    pub const INVALID_HANDLE: Self = Status(0xC000_0008_u32 as i32);
    pub const INVALID_PARAMETER: Self = Status(0xC000_000D_u32 as i32);
    pub const NO_SUCH_DEVICE: Self = Status(0xC000_000E_u32 as i32);
    pub const DELETE_PENDING: Self = Status(0xC000_0056_u32 as i32);
    pub const INSUFFICIENT_RESOURCES: Self = Status(0xC000_009A_u32 as i32);
    pub const DEVICE_DATA_ERROR: Self = Status(0xC000_009C_u32 as i32);
    pub const NOT_SUPPORTED: Self = Status(0xC000_00BB_u32 as i32);
    pub const CANCELLED: Self = Status(0xC000_0120_u32 as i32);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn is_error(self) -> bool {
        self.0 < 0
    }

    /// Turn an error value into `Err`, keeping success values (including
    /// `PENDING`) as `Ok`.
    pub fn result(self) -> Result<Status> {
        if self.is_error() {
            Err(Error::new(self))
        } else {
            Ok(self)
        }
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::PENDING => "PENDING",
            Self::UNSUCCESSFUL => "UNSUCCESSFUL",
            Self::NOT_IMPLEMENTED => "NOT_IMPLEMENTED",
            Self::INVALID_HANDLE => "INVALID_HANDLE",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::NO_SUCH_DEVICE => "NO_SUCH_DEVICE",
            Self::DELETE_PENDING => "DELETE_PENDING",
            Self::INSUFFICIENT_RESOURCES => "INSUFFICIENT_RESOURCES",
            Self::DEVICE_DATA_ERROR => "DEVICE_DATA_ERROR",
            Self::NOT_SUPPORTED => "NOT_SUPPORTED",
            Self::CANCELLED => "CANCELLED",
            _ => return None,
        })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#010x}", self.0 as u32),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error carrying the status that produced it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    status: Status,
}

impl Error {
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    pub fn status(self) -> Status {
        self.status
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({:?})", self.status)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)
    }
}

impl std::error::Error for Error {}

impl From<Error> for Status {
    fn from(err: Error) -> Status {
        err.status
    }
}

pub type Result<T> = std::result::Result<T, Error>;
