use std::{collections::BTreeSet, sync::Arc};

use tracing::debug;

use crate::{
    common::ClientId,
    data::{DataPartition, Datasource},
    divider::{BiasConfig, BiasedDivider, DividerConfigError, IidDivider, PartitionError},
    rng::SeededRng,
};

/// Gives IID partitions to one set of clients and biased partitions to another.
pub struct MixedDivider {
    iid: IidDivider,
    biased: BiasedDivider,
    iid_clients: BTreeSet<ClientId>,
    non_iid_clients: BTreeSet<ClientId>,
}

impl MixedDivider {
    pub fn new(
        datasource: Arc<dyn Datasource>,
        bias: BiasConfig,
        total_clients: u32,
        iid_clients: BTreeSet<ClientId>,
        non_iid_clients: BTreeSet<ClientId>,
    ) -> Result<Self, DividerConfigError> {
        let iid = IidDivider::new(datasource.clone(), bias.partition_size);
        let biased = BiasedDivider::new(datasource, bias, total_clients)?;
        Ok(Self {
            iid,
            biased,
            iid_clients,
            non_iid_clients,
        })
    }

    pub fn get_partition(
        &self,
        client_id: ClientId,
        rng: &mut SeededRng,
    ) -> Result<DataPartition, PartitionError> {
        if self.iid_clients.contains(&client_id) {
            debug!("client {} draws an iid partition", client_id);
            self.iid.get_partition(self.iid.partition_size(), rng)
        } else if self.non_iid_clients.contains(&client_id) {
            let pref = self.biased.preferred_label(rng);
            debug!("client {} draws a partition biased to label {}", client_id, pref);
            self.biased
                .get_partition(self.biased.partition_size(), pref, rng)
        } else {
            Err(PartitionError::UnknownClient(client_id))
        }
    }
}
