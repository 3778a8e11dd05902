//! # 错误处理框架
//!
//! 证书生命周期引擎共用的零依赖错误框架。
//!
//! 各子模块定义自己的领域错误枚举（例如 `pki_types::PkiError`），
//! 在跨越模块边界时统一转换为 [`ErrorInfo`]，携带稳定的错误码、
//! 错误类别和严重程度，便于工具层输出结构化的失败结果。
//!
//! ## 使用示例
//!
//! ```rust
//! use error::{ErrorInfo, ErrorCategory, ErrorSeverity};
//!
//! let error = ErrorInfo::new(7004, "Policy violations found".to_string())
//!     .with_category(ErrorCategory::Policy)
//!     .with_severity(ErrorSeverity::Warning)
//!     .with_context("issue_certificate".to_string());
//!
//! assert_eq!(error.code(), 7004);
//! assert_eq!(error.category().as_str(), "policy");
//! ```

use std::fmt;

/// 错误严重程度
///
/// 定义错误的严重程度级别，用于错误分类和处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// 信息级别：普通信息性错误
    Info = 1,
    /// 警告级别：调用方输入被拒绝，系统状态不受影响
    Warning = 2,
    /// 错误级别：需要处理的错误
    Error = 3,
    /// 严重级别：违反内部不变量，操作必须终止
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Info => write!(f, "信息"),
            ErrorSeverity::Warning => write!(f, "警告"),
            ErrorSeverity::Error => write!(f, "错误"),
            ErrorSeverity::Critical => write!(f, "严重"),
        }
    }
}

/// 错误类别
///
/// 定义错误的类别，便于错误分类和统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// IO 错误
    Io,
    /// 解析错误（PEM/DER/时间戳无法解码）
    Parse,
    /// 验证错误（签名校验失败等）
    Validation,
    /// 配置错误
    Configuration,
    /// 合规策略错误
    Policy,
    /// 生命周期状态错误
    Lifecycle,
    /// 资源不存在
    NotFound,
    /// 标识符冲突
    Conflict,
    /// 加密原语错误
    Encryption,
    /// 其他错误
    Other,
}

impl ErrorCategory {
    /// 机器可读的类别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Io => "io",
            ErrorCategory::Parse => "parse",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Encryption => "encryption",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Io => write!(f, "IO错误"),
            ErrorCategory::Parse => write!(f, "解析错误"),
            ErrorCategory::Validation => write!(f, "验证错误"),
            ErrorCategory::Configuration => write!(f, "配置错误"),
            ErrorCategory::Policy => write!(f, "策略错误"),
            ErrorCategory::Lifecycle => write!(f, "生命周期错误"),
            ErrorCategory::NotFound => write!(f, "资源不存在"),
            ErrorCategory::Conflict => write!(f, "标识符冲突"),
            ErrorCategory::Encryption => write!(f, "加密错误"),
            ErrorCategory::Other => write!(f, "其他错误"),
        }
    }
}

/// 错误类型的核心trait
///
/// 领域错误实现此trait后即可作为 [`ErrorInfo`] 的源错误。
pub trait ErrorKind: fmt::Debug + fmt::Display + Send + Sync {
    /// 获取错误码
    fn error_code(&self) -> u32;

    /// 获取错误消息
    fn error_message(&self) -> String;
}

/// 错误信息结构体
///
/// 封装了错误的详细信息，包括错误码、消息、上下文、严重程度和类别。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 错误码
    code: u32,
    /// 错误消息
    message: String,
    /// 错误上下文（用于添加额外信息）
    context: Vec<String>,
    /// 错误严重程度
    severity: ErrorSeverity,
    /// 错误类别
    category: ErrorCategory,
}

impl ErrorInfo {
    /// 创建一个新的错误信息
    ///
    /// # 参数
    ///
    /// * `code` - 错误码
    /// * `message` - 错误消息
    pub fn new(code: u32, message: String) -> Self {
        Self {
            code,
            message,
            context: Vec::new(),
            severity: ErrorSeverity::Error,
            category: ErrorCategory::Other,
        }
    }

    /// 从实现了 [`ErrorKind`] 的领域错误创建
    pub fn from_kind<E: ErrorKind>(kind: &E) -> Self {
        Self::new(kind.error_code(), kind.error_message())
    }

    /// 添加错误上下文
    pub fn add_context(&mut self, context: String) {
        self.context.push(context);
    }

    /// 链式添加错误上下文
    pub fn with_context(mut self, context: String) -> Self {
        self.context.push(context);
        self
    }

    /// 设置错误严重程度
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// 设置错误类别
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// 获取错误码
    pub fn code(&self) -> u32 {
        self.code
    }

    /// 获取错误消息
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取错误上下文
    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// 获取错误严重程度
    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 判断是否为严重错误
    pub fn is_critical(&self) -> bool {
        self.severity == ErrorSeverity::Critical
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}][错误码: {}] {}",
               self.severity, self.category, self.code, self.message)?;

        for ctx in &self.context {
            write!(f, "\n  上下文: {}", ctx)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

impl ErrorKind for ErrorInfo {
    fn error_code(&self) -> u32 {
        self.code
    }

    fn error_message(&self) -> String {
        self.message.clone()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ErrorInfo>;

impl From<std::io::Error> for ErrorInfo {
    fn from(err: std::io::Error) -> Self {
        let (code, category) = match err.kind() {
            std::io::ErrorKind::NotFound => (404, ErrorCategory::NotFound),
            std::io::ErrorKind::PermissionDenied => (403, ErrorCategory::Io),
            std::io::ErrorKind::InvalidInput => (400, ErrorCategory::Parse),
            std::io::ErrorKind::InvalidData => (400, ErrorCategory::Parse),
            std::io::ErrorKind::UnexpectedEof => (400, ErrorCategory::Io),
            _ => (500, ErrorCategory::Io),
        };

        ErrorInfo::new(code, err.to_string())
            .with_category(category)
            .with_severity(ErrorSeverity::Error)
    }
}
