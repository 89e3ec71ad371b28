//! Dispatcher errors and their JSON-RPC error objects.

use evm_core::{NodeError, PoolError};
use evm_db::{ChainError, ErrorKind, StateError};
use evm_rpc_types::{
    RpcErrorView, CODE_ACCOUNT_NOT_FOUND, CODE_EXECUTION_REVERTED, CODE_FILTER_NOT_FOUND,
    CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS, CODE_INVALID_REQUEST, CODE_METHOD_NOT_FOUND,
    CODE_PARSE_ERROR, CODE_SNAPSHOT_NOT_FOUND, CODE_STATE_ROOT_NOT_FOUND, CODE_TRANSPORT_ERROR,
};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter {0} not found")]
    NotFound(String),
}

impl FilterError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method {0} does not exist or is not available")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::Parse(_)
            | RpcError::InvalidRequest(_)
            | RpcError::MethodNotFound(_)
            | RpcError::InvalidParams(_) => ErrorKind::Validation,
            RpcError::Filter(err) => err.kind(),
            RpcError::Node(err) => err.kind(),
            RpcError::Internal(_) => ErrorKind::Fatal,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => CODE_PARSE_ERROR,
            RpcError::InvalidRequest(_) => CODE_INVALID_REQUEST,
            RpcError::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => CODE_INVALID_PARAMS,
            RpcError::Filter(_) => CODE_FILTER_NOT_FOUND,
            RpcError::Node(err) => node_code(err),
            RpcError::Internal(_) => CODE_INTERNAL_ERROR,
        }
    }

    pub fn to_view(&self) -> RpcErrorView {
        let view = RpcErrorView::new(self.code(), self.to_string());
        match self {
            RpcError::Node(NodeError::Reverted { output }) => {
                view.with_data(Value::String(format!("0x{}", hex::encode(output))))
            }
            _ => view,
        }
    }
}

impl From<PoolError> for RpcError {
    fn from(err: PoolError) -> Self {
        RpcError::Node(err.into())
    }
}

impl From<ChainError> for RpcError {
    fn from(err: ChainError) -> Self {
        RpcError::Node(err.into())
    }
}

impl From<evm_fork::ForkError> for RpcError {
    fn from(err: evm_fork::ForkError) -> Self {
        RpcError::Node(err.into())
    }
}

fn node_code(err: &NodeError) -> i64 {
    match err {
        NodeError::AccountNotFound(_) => CODE_ACCOUNT_NOT_FOUND,
        NodeError::SnapshotNotFound(_) => CODE_SNAPSHOT_NOT_FOUND,
        NodeError::BlockNotFound(_)
        | NodeError::Chain(ChainError::BlockNotFound(_))
        | NodeError::State(StateError::StateRootNotFound(_)) => CODE_STATE_ROOT_NOT_FOUND,
        _ => match err.kind() {
            ErrorKind::Validation => CODE_INVALID_PARAMS,
            ErrorKind::NotFound => CODE_STATE_ROOT_NOT_FOUND,
            ErrorKind::Execution => CODE_EXECUTION_REVERTED,
            ErrorKind::Transport => CODE_TRANSPORT_ERROR,
            ErrorKind::Fatal => CODE_INTERNAL_ERROR,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use evm_fork::ForkError;

    #[test]
    fn revert_carries_output_as_data() {
        let err = RpcError::from(NodeError::Reverted {
            output: Bytes::from_static(&[0xde, 0xad]),
        });
        let view = err.to_view();
        assert_eq!(view.code, CODE_EXECUTION_REVERTED);
        assert_eq!(view.data, Some(Value::String("0xdead".to_string())));
    }

    #[test]
    fn kinds_map_to_reserved_codes() {
        let cases = [
            (RpcError::from(PoolError::NonceTooLow { expected: 2, got: 1 }), CODE_INVALID_PARAMS),
            (RpcError::from(FilterError::NotFound("0x1".into())), CODE_FILTER_NOT_FOUND),
            (RpcError::from(NodeError::SnapshotNotFound(9)), CODE_SNAPSHOT_NOT_FOUND),
            (RpcError::from(NodeError::AccountNotFound("0x1".into())), CODE_ACCOUNT_NOT_FOUND),
            (
                RpcError::from(NodeError::State(StateError::StateRootNotFound(Default::default()))),
                CODE_STATE_ROOT_NOT_FOUND,
            ),
            (RpcError::from(ForkError::Timeout), CODE_TRANSPORT_ERROR),
            (RpcError::from(NodeError::Halted("OutOfGas".into())), CODE_EXECUTION_REVERTED),
            (RpcError::from(NodeError::NotReady("boom".into())), CODE_INTERNAL_ERROR),
            (RpcError::MethodNotFound("x".into()), CODE_METHOD_NOT_FOUND),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }
}
