pub mod liquidity;

pub(crate) mod liquidity_proto {
    tonic::include_proto!("liquidity.v1beta1");
}

pub use liquidity::GrpcLiquidityClient;
