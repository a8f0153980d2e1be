//! Keep ECDSA 質押合約綁定
//!
//! 兩個授權門：
//! 1. `BondedECDSAKeepFactory` - 運營者合約授權（一級）
//! 2. `KeepBonding` - sortition pool 二級授權，以及其撤銷交易

use crate::ledger::ContractCall;
use crate::types::{Address, ContractAddresses};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    #[sol(rpc)]
    interface IBondedECDSAKeepFactory {
        function getSortitionPool(address _application) external view returns (address);
        function isOperatorAuthorized(address _operator) external view returns (bool);
    }

    #[sol(rpc)]
    interface IKeepBonding {
        function hasSecondaryAuthorization(address _operator, address _poolAddress) external view returns (bool);
        function deauthorizeSortitionPoolContract(address _operator, address _poolAddress) external;
    }
}

pub const GET_SORTITION_POOL: &str = IBondedECDSAKeepFactory::getSortitionPoolCall::SIGNATURE;
pub const IS_OPERATOR_AUTHORIZED: &str =
    IBondedECDSAKeepFactory::isOperatorAuthorizedCall::SIGNATURE;
pub const HAS_SECONDARY_AUTHORIZATION: &str =
    IKeepBonding::hasSecondaryAuthorizationCall::SIGNATURE;
pub const DEAUTHORIZE_SORTITION_POOL_CONTRACT: &str =
    IKeepBonding::deauthorizeSortitionPoolContractCall::SIGNATURE;

/// 去掉參數列表的方法名，用作緩存查詢鍵
pub fn method_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature)
}

/// BondedECDSAKeepFactory
#[derive(Debug, Clone)]
pub struct KeepFactory {
    address: Address,
}

impl KeepFactory {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn get_sortition_pool(&self, application: &Address) -> ContractCall {
        ContractCall::GetSortitionPool {
            factory: self.address,
            application: *application,
        }
    }

    pub fn is_operator_authorized(&self, operator: &Address) -> ContractCall {
        ContractCall::IsOperatorAuthorized {
            factory: self.address,
            operator: *operator,
        }
    }
}

/// KeepBonding
#[derive(Debug, Clone)]
pub struct KeepBonding {
    address: Address,
}

impl KeepBonding {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn has_secondary_authorization(&self, operator: &Address, pool: &Address) -> ContractCall {
        ContractCall::HasSecondaryAuthorization {
            bonding: self.address,
            operator: *operator,
            pool: *pool,
        }
    }
}

/// 審計使用的全部合約
#[derive(Debug, Clone)]
pub struct Contracts {
    pub factory: KeepFactory,
    pub bonding: KeepBonding,
    pub sanctioned_application: Address,
}

impl From<&ContractAddresses> for Contracts {
    fn from(addresses: &ContractAddresses) -> Self {
        Self {
            factory: KeepFactory::new(addresses.keep_factory),
            bonding: KeepBonding::new(addresses.keep_bonding),
            sanctioned_application: addresses.sanctioned_application,
        }
    }
}
