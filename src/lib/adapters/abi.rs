use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IPrivacyPool {
        function isKnownRoot(bytes32 root) external view returns (bool);
        function isSpent(bytes32 nullifierHash) external view returns (bool);

        event Deposit(bytes32 indexed commitment, uint256 leafIndex, uint256 timestamp);

        event Withdrawal(
            address recipient,
            bytes32 nullifierHash,
            address indexed relayer,
            uint256 fee
        );
    }

    #[sol(rpc)]
    interface IHasher {
        function MiMCSponge(uint256 in_xL, uint256 in_xR) external pure returns (uint256 xL, uint256 xR);
    }
}
