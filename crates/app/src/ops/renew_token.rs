use clap::Args;

use common::cluster::{ClusterId, NodeRole};
use common::instance_token::InstanceTokenError;

#[derive(Args, Debug, Clone)]
pub struct RenewToken {
    /// Cluster the node belongs to
    pub cluster_id: ClusterId,

    /// Node role whose token role mints the instance token
    #[arg(long)]
    pub role: NodeRole,
}

#[async_trait::async_trait]
impl crate::op::Op for RenewToken {
    type Error = InstanceTokenError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let instance = ctx
            .instance_token()
            .with_role(self.cluster_id.clone(), self.role);
        instance.token_renew_run(&ctx.backend).await?;

        Ok(format!("instance token for role '{}' renewed", self.role))
    }
}
