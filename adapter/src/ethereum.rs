//! The custody contract client: one instance per configured chain.

use web3::{
    contract::{Contract, Options as ContractOptions},
    ethabi::{self, RawLog, Token},
    signing::{SecretKey, SecretKeyRef},
    transports::Http,
    types::{BlockNumber, Bytes, FilterBuilder, Log, H160, H256, U256},
    Web3,
};

use primitives::{Address, Chain, ChainId, ChannelId, Signature};

use crate::{
    state::{u256_to_i128, StateAllocation},
    Error, Signer,
};

const CUSTODY_ABI: &[u8] = include_bytes!("custody_abi.json");

/// Where a log sits in the chain's history; the reconciler's checkpoint unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u64,
}

/// A decoded custody contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustodyEvent {
    Created {
        channel_id: ChannelId,
        participants: Vec<Address>,
        adjudicator: Address,
        nonce: u64,
        initial_data: Vec<u8>,
        initial_allocations: Vec<StateAllocation>,
    },
    Joined {
        channel_id: ChannelId,
        index: u64,
    },
    Resized {
        channel_id: ChannelId,
        deltas: Vec<i128>,
    },
    Closed {
        channel_id: ChannelId,
    },
}

/// The broker's on-chain standing for one token, as the contract reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub available: U256,
    pub channel_count: u64,
}

pub struct Custody {
    web3: Web3<Http>,
    contract: Contract<Http>,
    chain: Chain,
}

impl Custody {
    pub fn new(chain: &Chain) -> Result<Self, Error> {
        let transport = Http::new(&chain.rpc)?;
        let web3 = Web3::new(transport);

        let contract =
            Contract::from_json(web3.eth(), H160(chain.custody.to_bytes()), CUSTODY_ABI)?;

        Ok(Self {
            web3,
            contract,
            chain: chain.clone(),
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain.chain_id
    }

    pub async fn latest_block(&self) -> Result<u64, Error> {
        Ok(self.web3.eth().block_number().await?.as_u64())
    }

    /// Fetches and decodes the custody events in `[from_block, to_block]`,
    /// ordered by block and log index. Logs that are not one of the four
    /// known events are skipped.
    pub async fn events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(EventPosition, CustodyEvent)>, Error> {
        let filter = FilterBuilder::default()
            .address(vec![H160(self.chain.custody.to_bytes())])
            .from_block(BlockNumber::Number(from_block.into()))
            .to_block(BlockNumber::Number(to_block.into()))
            .build();

        let logs = self.web3.eth().logs(filter).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let position = position_of(log)?;

            if let Some(event) = decode_event(self.contract.abi(), log)? {
                events.push((position, event));
            }
        }
        events.sort_by_key(|(position, _)| *position);

        Ok(events)
    }

    /// Submits `join(channel_id, index=1, sig)`; the broker always joins as
    /// the second participant.
    pub async fn join(
        &self,
        signer: &Signer,
        channel_id: ChannelId,
        signature: &Signature,
    ) -> Result<H256, Error> {
        let secret = SecretKey::from_slice(&signer.secret_bytes())
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        let tx_hash = self
            .contract
            .signed_call(
                "join",
                (
                    H256(channel_id.to_bytes()),
                    U256::one(),
                    Bytes(signature.to_electrum().to_vec()),
                ),
                ContractOptions::with(|options| options.gas = Some(3_000_000.into())),
                SecretKeyRef::new(&secret),
            )
            .await?;

        Ok(tx_hash)
    }

    pub async fn account_info(&self, owner: Address, token: Address) -> Result<AccountInfo, Error> {
        let (available, channel_count): (U256, U256) = self
            .contract
            .query(
                "getAccountInfo",
                (H160(owner.to_bytes()), H160(token.to_bytes())),
                None,
                ContractOptions::default(),
                None,
            )
            .await?;

        Ok(AccountInfo {
            available,
            channel_count: channel_count.low_u64(),
        })
    }
}

fn position_of(log: &Log) -> Result<EventPosition, Error> {
    let block_number = log
        .block_number
        .ok_or_else(|| Error::Decode("log without block number".to_string()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| Error::Decode("log without log index".to_string()))?;

    Ok(EventPosition {
        block_number: block_number.as_u64(),
        log_index: log_index.low_u64(),
    })
}

/// Decodes a raw log against the custody ABI. `Ok(None)` for foreign events.
pub fn decode_event(abi: &ethabi::Contract, log: &Log) -> Result<Option<CustodyEvent>, Error> {
    let topic0 = match log.topics.first() {
        Some(topic) => *topic,
        None => return Ok(None),
    };

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.0.clone(),
    };

    let created = abi.event("Created")?;
    let joined = abi.event("Joined")?;
    let resized = abi.event("Resized")?;
    let closed = abi.event("Closed")?;

    let event = if topic0 == created.signature() {
        let parsed = created.parse_log(raw)?;

        let channel = tuple_param(&parsed, "channel")?;
        let mut channel = channel.into_iter();
        let participants = channel
            .next()
            .and_then(Token::into_array)
            .ok_or_else(|| Error::Decode("channel.participants".to_string()))?
            .into_iter()
            .map(address_token)
            .collect::<Result<Vec<_>, _>>()?;
        let adjudicator = channel
            .next()
            .map(address_token)
            .ok_or_else(|| Error::Decode("channel.adjudicator".to_string()))??;
        let _challenge = channel.next();
        let nonce = channel
            .next()
            .map(u64_token)
            .ok_or_else(|| Error::Decode("channel.nonce".to_string()))??;

        let initial = tuple_param(&parsed, "initial")?;
        let mut initial = initial.into_iter();
        let initial_data = initial
            .next()
            .and_then(Token::into_bytes)
            .ok_or_else(|| Error::Decode("initial.data".to_string()))?;
        let initial_allocations = initial
            .next()
            .and_then(Token::into_array)
            .ok_or_else(|| Error::Decode("initial.allocations".to_string()))?
            .into_iter()
            .map(allocation_token)
            .collect::<Result<Vec<_>, _>>()?;

        CustodyEvent::Created {
            channel_id: channel_id_param(&parsed)?,
            participants,
            adjudicator,
            nonce,
            initial_data,
            initial_allocations,
        }
    } else if topic0 == joined.signature() {
        let parsed = joined.parse_log(raw)?;
        let index = u64_token(param(&parsed, "index")?)?;

        CustodyEvent::Joined {
            channel_id: channel_id_param(&parsed)?,
            index,
        }
    } else if topic0 == resized.signature() {
        let parsed = resized.parse_log(raw)?;
        let deltas = param(&parsed, "deltaAllocations")?
            .into_array()
            .ok_or_else(|| Error::Decode("deltaAllocations".to_string()))?
            .into_iter()
            .map(|token| {
                token
                    .into_int()
                    .and_then(u256_to_i128)
                    .ok_or_else(|| Error::Decode("delta allocation".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        CustodyEvent::Resized {
            channel_id: channel_id_param(&parsed)?,
            deltas,
        }
    } else if topic0 == closed.signature() {
        let parsed = closed.parse_log(raw)?;

        CustodyEvent::Closed {
            channel_id: channel_id_param(&parsed)?,
        }
    } else {
        return Ok(None);
    };

    Ok(Some(event))
}

fn param(parsed: &ethabi::Log, name: &str) -> Result<Token, Error> {
    parsed
        .params
        .iter()
        .find(|param| param.name == name)
        .map(|param| param.value.clone())
        .ok_or_else(|| Error::Decode(format!("missing event param {}", name)))
}

fn tuple_param(parsed: &ethabi::Log, name: &str) -> Result<Vec<Token>, Error> {
    param(parsed, name)?
        .into_tuple()
        .ok_or_else(|| Error::Decode(format!("event param {} is not a tuple", name)))
}

fn channel_id_param(parsed: &ethabi::Log) -> Result<ChannelId, Error> {
    let bytes = param(parsed, "channelId")?
        .into_fixed_bytes()
        .ok_or_else(|| Error::Decode("channelId".to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Decode("channelId length".to_string()))?;

    Ok(ChannelId::from(bytes))
}

fn address_token(token: Token) -> Result<Address, Error> {
    token
        .into_address()
        .map(|address| Address::from(address.0))
        .ok_or_else(|| Error::Decode("expected an address".to_string()))
}

fn u64_token(token: Token) -> Result<u64, Error> {
    let value = token
        .into_uint()
        .ok_or_else(|| Error::Decode("expected a uint".to_string()))?;

    u64::try_from(value).map_err(|_| Error::Decode("uint out of u64 range".to_string()))
}

fn allocation_token(token: Token) -> Result<StateAllocation, Error> {
    let mut fields = token
        .into_tuple()
        .ok_or_else(|| Error::Decode("allocation is not a tuple".to_string()))?
        .into_iter();

    let destination = fields
        .next()
        .map(address_token)
        .ok_or_else(|| Error::Decode("allocation.destination".to_string()))??;
    let token_address = fields
        .next()
        .map(address_token)
        .ok_or_else(|| Error::Decode("allocation.token".to_string()))??;
    let amount = fields
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| Error::Decode("allocation.amount".to_string()))?;

    Ok(StateAllocation {
        destination,
        token: token_address,
        amount,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use primitives::test_util::{ALICE, BOB, TOKEN_USDC};

    fn abi() -> ethabi::Contract {
        serde_json::from_slice(CUSTODY_ABI).expect("bundled ABI parses")
    }

    fn log(topics: Vec<H256>, data: Vec<u8>) -> Log {
        Log {
            address: H160::zero(),
            topics,
            data: Bytes(data),
            block_hash: None,
            block_number: Some(7.into()),
            transaction_hash: None,
            transaction_index: None,
            log_index: Some(0.into()),
            transaction_log_index: None,
            log_type: None,
            removed: None,
        }
    }

    fn channel_id() -> ChannelId {
        "0x000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
            .parse()
            .expect("valid channel id")
    }

    #[test]
    fn decodes_created_events() {
        let abi = abi();
        let event = abi.event("Created").expect("event in ABI");

        let data = ethabi::encode(&[
            Token::Tuple(vec![
                Token::Array(vec![
                    Token::Address(H160(ALICE.to_bytes())),
                    Token::Address(H160(BOB.to_bytes())),
                ]),
                Token::Address(H160(BOB.to_bytes())),
                Token::Uint(86_400.into()),
                Token::Uint(5.into()),
            ]),
            Token::Tuple(vec![
                Token::Bytes(vec![]),
                Token::Array(vec![Token::Tuple(vec![
                    Token::Address(H160(ALICE.to_bytes())),
                    Token::Address(H160(TOKEN_USDC.to_bytes())),
                    Token::Uint(100_000_000.into()),
                ])]),
            ]),
        ]);

        let raw_log = log(
            vec![event.signature(), H256(channel_id().to_bytes())],
            data,
        );
        let decoded = decode_event(&abi, &raw_log)
            .expect("decodes")
            .expect("is a custody event");

        match decoded {
            CustodyEvent::Created {
                channel_id: decoded_id,
                participants,
                adjudicator,
                nonce,
                initial_data,
                initial_allocations,
            } => {
                assert_eq!(channel_id(), decoded_id);
                assert_eq!(vec![*ALICE, *BOB], participants);
                assert_eq!(*BOB, adjudicator);
                assert_eq!(5, nonce);
                assert!(initial_data.is_empty());
                assert_eq!(1, initial_allocations.len());
                assert_eq!(*ALICE, initial_allocations[0].destination);
                assert_eq!(*TOKEN_USDC, initial_allocations[0].token);
                assert_eq!(U256::from(100_000_000_u64), initial_allocations[0].amount);
            }
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn decodes_resized_events_with_negative_deltas() {
        let abi = abi();
        let event = abi.event("Resized").expect("event in ABI");

        let data = ethabi::encode(&[Token::Array(vec![
            Token::Int(crate::state::i128_to_u256(-100_000_000)),
            Token::Int(crate::state::i128_to_u256(0)),
        ])]);

        let raw_log = log(
            vec![event.signature(), H256(channel_id().to_bytes())],
            data,
        );
        let decoded = decode_event(&abi, &raw_log)
            .expect("decodes")
            .expect("is a custody event");

        assert_eq!(
            CustodyEvent::Resized {
                channel_id: channel_id(),
                deltas: vec![-100_000_000, 0],
            },
            decoded
        );
    }

    #[test]
    fn decodes_joined_and_closed_events() {
        let abi = abi();

        let joined = abi.event("Joined").expect("event in ABI");
        let data = ethabi::encode(&[Token::Uint(1.into())]);
        let raw_log = log(vec![joined.signature(), H256(channel_id().to_bytes())], data);
        assert_eq!(
            Some(CustodyEvent::Joined {
                channel_id: channel_id(),
                index: 1,
            }),
            decode_event(&abi, &raw_log).expect("decodes")
        );

        let closed = abi.event("Closed").expect("event in ABI");
        let raw_log = log(vec![closed.signature(), H256(channel_id().to_bytes())], vec![]);
        assert_eq!(
            Some(CustodyEvent::Closed {
                channel_id: channel_id(),
            }),
            decode_event(&abi, &raw_log).expect("decodes")
        );
    }

    #[test]
    fn foreign_events_are_skipped() {
        let abi = abi();
        let raw_log = log(vec![H256([0xee_u8; 32])], vec![]);

        assert_eq!(None, decode_event(&abi, &raw_log).expect("decodes"));
    }
}
