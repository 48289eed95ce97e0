pub struct Logger {
	inner: std::sync::Mutex<LoggerInner>,
}

impl Logger {
	pub fn new() -> Self {
		Logger {
			inner: std::sync::Mutex::new(LoggerInner {
				sequence_number: 0,
				records: vec![],
			}),
		}
	}

	/// Takes the JSON records written so far, as the elements of a JSON array without the enclosing brackets.
	pub fn take_records(&self) -> Vec<u8> {
		let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
		std::mem::take(&mut inner.records)
	}

	pub fn report_error(&self, err: &anyhow::Error) {
		self.report_inner(Report::Error { err });
	}

	pub fn report_message(&self, message: std::fmt::Arguments<'_>) {
		self.report_inner(Report::Message { message });
	}

	pub async fn report_operation<TObjectId, F>(
		&self,
		object_type: &str,
		object_id: TObjectId,
		operation: ScopedObjectOperation<'_>,
		f: F,
	) -> F::Output
	where
		TObjectId: std::fmt::Display,
		F: std::future::Future,
		F::Output: std::fmt::Debug,
	{
		let id = object_id.to_string();
		let id = &*id;

		match operation {
			ScopedObjectOperation::Create { value } => {
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::CreateStart { value } });
				let result = f.await;
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::CreateEnd { value: &format!("{result:?}") } });
				result
			},

			ScopedObjectOperation::Delete => {
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::DeleteStart });
				let result = f.await;
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::DeleteEnd });
				result
			},

			ScopedObjectOperation::Get => {
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::GetStart });
				let result = f.await;
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::GetEnd { value: &format!("{result:?}") } });
				result
			},

			ScopedObjectOperation::Update { value } => {
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::UpdateStart { value } });
				let result = f.await;
				self.report_inner(Report::ObjectOperation { r#type: object_type, id, operation: ObjectOperation::UpdateEnd { value: &format!("{result:?}") } });
				result
			},
		}
	}

	pub fn report_state<TObjectId>(&self, object_type: &str, object_id: TObjectId, state: std::fmt::Arguments<'_>)
	where
		TObjectId: std::fmt::Display,
	{
		self.report_inner(Report::ObjectState { r#type: object_type, id: &object_id.to_string(), state });
	}

	fn report_inner(&self, report: Report<'_>) {
		let timestamp = time::OffsetDateTime::now_utc();

		{
			let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			let LoggerInner { sequence_number, records } = &mut *inner;

			*sequence_number += 1;

			let record = Record {
				timestamp,
				sequence_number: *sequence_number,
				report,
			};
			if let Ok(record) = serde_json::to_vec(&record) {
				if !records.is_empty() {
					records.push(b',');
				}
				records.extend_from_slice(&record);
			}
		}

		log::log!(
			if matches!(report, Report::Error { .. }) { log::Level::Error } else { log::Level::Info },
			"{report}",
		);
	}
}

impl Default for Logger {
	fn default() -> Self {
		Logger::new()
	}
}

#[derive(Clone, Copy, Debug)]
pub enum ScopedObjectOperation<'a> {
	Create { value: &'a str },
	Delete,
	Get,
	Update { value: &'a str },
}

/// Hides the wrapped value from `Debug` output, so that it can flow through `Logger::report_operation`.
pub struct Secret<T>(pub T);

impl<T> std::fmt::Debug for Secret<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("******")
	}
}

struct LoggerInner {
	sequence_number: usize,
	records: Vec<u8>,
}

struct Record<'a> {
	timestamp: time::OffsetDateTime,
	sequence_number: usize,
	report: Report<'a>,
}

#[derive(Clone, Copy, Debug)]
enum Report<'a> {
	Error {
		err: &'a anyhow::Error,
	},

	Message {
		message: std::fmt::Arguments<'a>,
	},

	ObjectOperation {
		r#type: &'a str,
		id: &'a str,
		operation: ObjectOperation<'a>,
	},

	ObjectState {
		r#type: &'a str,
		id: &'a str,
		state: std::fmt::Arguments<'a>,
	},
}

impl std::fmt::Display for Report<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Report::Error { err } => write!(f, "{err:?}"),
			Report::Message { message } => write!(f, "{message}"),
			Report::ObjectOperation { r#type, id, operation } => write!(f, "{type} {id} {operation:?}"),
			Report::ObjectState { r#type, id, state } => write!(f, "{type} {id} is {state}"),
		}
	}
}

#[derive(Clone, Copy, Debug)]
enum ObjectOperation<'a> {
	CreateStart { value: &'a str },
	CreateEnd { value: &'a str },

	DeleteStart,
	DeleteEnd,

	GetStart,
	GetEnd { value: &'a str },

	UpdateStart { value: &'a str },
	UpdateEnd { value: &'a str },
}

impl serde::Serialize for Record<'_> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: serde::Serializer {
		use serde::ser::SerializeStruct;

		let Record {
			timestamp,
			sequence_number,
			report,
		} = self;

		let mut serializer = serializer.serialize_struct("Record", 1)?;

		serializer.serialize_field("TimeCollected", &time2::rfc3339_milliseconds(*timestamp))?;
		serializer.serialize_field("SequenceNumber", sequence_number)?;

		match report {
			Report::Error { err } => {
				serializer.serialize_field("Level", &SerializeWith(log::Level::Error))?;
				serializer.serialize_field("Exception", &format!("{err:?}"))?;
			},

			Report::Message { message } => {
				serializer.serialize_field("Level", &SerializeWith(log::Level::Info))?;
				serializer.serialize_field("Message", &message.to_string())?;
			},

			Report::ObjectOperation { r#type, id, operation } => {
				serializer.serialize_field("Level", &SerializeWith(log::Level::Info))?;
				serializer.serialize_field("ObjectType", r#type)?;
				serializer.serialize_field("ObjectId", id)?;
				match operation {
					ObjectOperation::CreateStart { value } => {
						serializer.serialize_field("ObjectOperation", "CreateStart")?;
						serializer.serialize_field("ObjectValue", value)?;
					},

					ObjectOperation::CreateEnd { value } => {
						serializer.serialize_field("ObjectOperation", "CreateEnd")?;
						serializer.serialize_field("ObjectValue", value)?;
					},

					ObjectOperation::DeleteStart => {
						serializer.serialize_field("ObjectOperation", "DeleteStart")?;
					},

					ObjectOperation::DeleteEnd => {
						serializer.serialize_field("ObjectOperation", "DeleteEnd")?;
					},

					ObjectOperation::GetStart => {
						serializer.serialize_field("ObjectOperation", "GetStart")?;
					},

					ObjectOperation::GetEnd { value } => {
						serializer.serialize_field("ObjectOperation", "GetEnd")?;
						serializer.serialize_field("ObjectValue", value)?;
					},

					ObjectOperation::UpdateStart { value } => {
						serializer.serialize_field("ObjectOperation", "UpdateStart")?;
						serializer.serialize_field("ObjectValue", value)?;
					},

					ObjectOperation::UpdateEnd { value } => {
						serializer.serialize_field("ObjectOperation", "UpdateEnd")?;
						serializer.serialize_field("ObjectValue", value)?;
					},
				}
			},

			Report::ObjectState { r#type, id, state } => {
				serializer.serialize_field("Level", &SerializeWith(log::Level::Info))?;
				serializer.serialize_field("ObjectType", r#type)?;
				serializer.serialize_field("ObjectId", id)?;
				serializer.serialize_field("ObjectState", &state.to_string())?;
			},
		}

		serializer.end()
	}
}

struct SerializeWith<T>(T);

impl serde::Serialize for SerializeWith<log::Level> {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: serde::Serializer {
		match self.0 {
			log::Level::Debug => serializer.serialize_str("Debug"),
			log::Level::Error => serializer.serialize_str("Error"),
			log::Level::Info => serializer.serialize_str("Information"),
			log::Level::Trace => serializer.serialize_str("Trace"),
			log::Level::Warn => serializer.serialize_str("Warning"),
		}
	}
}

#[cfg(test)]
mod tests {
	fn records(logger: &super::Logger) -> Vec<serde_json::Value> {
		let mut records = b"[".to_vec();
		records.extend(logger.take_records());
		records.push(b']');
		serde_json::from_slice(&records).unwrap()
	}

	#[tokio::test]
	async fn operation_is_bracketed_by_start_and_end() {
		let logger = super::Logger::new();

		let value = logger.report_operation("acme/authorization", "https://example.com/acme/authz/1", super::ScopedObjectOperation::Get, async {
			Ok::<_, std::convert::Infallible>(5)
		}).await;
		assert!(matches!(value, Ok(5)));

		let records = records(&logger);
		assert_eq!(records.len(), 2);

		assert_eq!(records[0]["SequenceNumber"], 1);
		assert_eq!(records[0]["ObjectType"], "acme/authorization");
		assert_eq!(records[0]["ObjectId"], "https://example.com/acme/authz/1");
		assert_eq!(records[0]["ObjectOperation"], "GetStart");

		assert_eq!(records[1]["SequenceNumber"], 2);
		assert_eq!(records[1]["ObjectOperation"], "GetEnd");
		assert_eq!(records[1]["ObjectValue"], "Ok(5)");
	}

	#[test]
	fn secrets_are_not_logged() {
		let logger = super::Logger::new();

		logger.report_state("acme/nonce", "", format_args!("{:?}", super::Secret("abcdef")));

		let records = records(&logger);
		assert_eq!(records.len(), 1);
		assert_eq!(records[0]["Level"], "Information");
		assert_eq!(records[0]["ObjectState"], "******");
	}

	#[test]
	fn take_records_drains() {
		let logger = super::Logger::new();

		logger.report_message(format_args!("Waiting for {:?} ...", std::time::Duration::from_secs(1)));
		logger.report_error(&anyhow::anyhow!("could not get authorization"));

		let records = records(&logger);
		assert_eq!(records.len(), 2);
		assert_eq!(records[0]["Message"], "Waiting for 1s ...");
		assert_eq!(records[1]["Level"], "Error");

		assert!(logger.take_records().is_empty());
	}
}
